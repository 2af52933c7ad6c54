use std::borrow::Cow;
use std::path::{Path, PathBuf};

pub trait ExtractFileName {
    fn extract_filename(&self) -> Cow<'_, str>;
}

impl ExtractFileName for Path {
    fn extract_filename(&self) -> Cow<'_, str> {
        self.file_name()
            .map(|name| name.to_string_lossy())
            .unwrap_or_default()
    }
}

impl ExtractFileName for PathBuf {
    fn extract_filename(&self) -> Cow<'_, str> {
        self.as_path().extract_filename()
    }
}
