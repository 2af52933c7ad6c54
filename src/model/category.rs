use std::fmt::{Display, Formatter};
use std::path::Path;
use crate::utils::paths::ExtractFileName;

/// Model files are named `basic[mM]odel_<g>_lbs_...`, with the gender
/// marker at this character index.
const MARKER_INDEX: usize = 11;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Category {
    Female,
    Male,
    Neutral
}

impl Category {
    pub fn from_file_name(name: &str) -> Self {
        match name.chars().nth(MARKER_INDEX) {
            Some('f') => Category::Female,
            Some('m') => Category::Male,
            _ => Category::Neutral
        }
    }

    pub fn from_path(path: impl AsRef<Path>) -> Self {
        Category::from_file_name(&path.as_ref().extract_filename())
    }

    /// `SMPL_FEMALE.npz`, `SMPL_MALE.npz` or `SMPL_NEUTRAL.npz`.
    pub fn archive_name(&self) -> String {
        format!("SMPL_{}.npz", self)
    }
}

impl Display for Category {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Category::Female => write!(f, "FEMALE"),
            Category::Male => write!(f, "MALE"),
            Category::Neutral => write!(f, "NEUTRAL")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_gender_marker() {
        assert_eq!(Category::from_file_name("basicModel_f_lbs_10_207_0_v1.0.0.pkl"), Category::Female);
        assert_eq!(Category::from_file_name("basicmodel_m_lbs_10_207_0_v1.0.0.pkl"), Category::Male);
        assert_eq!(Category::from_file_name("basicModel_neutral_lbs_10_207_0_v1.0.0.pkl"), Category::Neutral);
    }

    #[test]
    fn short_names_are_neutral() {
        assert_eq!(Category::from_file_name("model.pkl"), Category::Neutral);
        assert_eq!(Category::from_file_name("basicModel_"), Category::Neutral);
        assert_eq!(Category::from_file_name(""), Category::Neutral);
    }

    #[test]
    fn only_the_file_name_counts() {
        assert_eq!(Category::from_path("/models/mmmmmmmmmmmm/basicModel_f_x.pkl"), Category::Female);
        assert_eq!(Category::from_path("models/basicModel_m_x.pkl"), Category::Male);
        assert_eq!(Category::from_path("xxxxxxxxxxxf/short.pkl"), Category::Neutral);
    }

    #[test]
    fn archive_names() {
        assert_eq!(Category::Female.archive_name(), "SMPL_FEMALE.npz");
        assert_eq!(Category::Male.archive_name(), "SMPL_MALE.npz");
        assert_eq!(Category::Neutral.archive_name(), "SMPL_NEUTRAL.npz");
    }

    #[test]
    fn marker_is_case_sensitive() {
        assert_eq!(Category::from_file_name("basicModel_F_lbs.pkl"), Category::Neutral);
    }
}
