use std::cell::RefCell;
use std::fmt::{Display, Formatter};
use std::rc::Rc;

pub type Shared<T> = Rc<RefCell<T>>;

/// A decoded pickle value.
///
/// Mutable containers are shared so that an object which was memoized
/// before being filled in (which is how the pickler emits lists, dicts and
/// `BUILD` states) looks the same through every later memo reference.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(Rc<str>),
    Bytes(Rc<[u8]>),
    Tuple(Rc<[Value]>),
    List(Shared<Vec<Value>>),
    Dict(Shared<Vec<(Value, Value)>>),
    Set(Shared<Vec<Value>>),
    Global(Rc<Global>),
    Object(Shared<Object>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Global {
    pub module: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Object {
    pub class: Value,
    pub args: Vec<Value>,
    pub state: Option<Value>,
}

impl Global {
    pub fn new(module: &str, name: &str) -> Self {
        // Same renames the Python 3 unpickler applies to Python 2 pickles
        let module = match module {
            "copy_reg" => "copyreg",
            "__builtin__" => "builtins",
            other => other
        };
        Global { module: module.to_string(), name: name.to_string() }
    }

    pub fn is(&self, module: &str, name: &str) -> bool {
        self.module == module && self.name == name
    }
}

impl Display for Global {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.module, self.name)
    }
}

impl Object {
    pub fn class_global(&self) -> Option<&Global> {
        match &self.class {
            Value::Global(global) => Some(global),
            _ => None
        }
    }

    pub fn class_name(&self) -> String {
        match &self.class {
            Value::Global(global) => global.to_string(),
            other => other.type_name()
        }
    }

    pub fn attribute(&self, name: &str) -> Option<Value> {
        match &self.state {
            Some(state @ Value::Dict(_)) => state.get(name),
            // (dict_state, slot_state) pairs, as produced by __reduce_ex__(2) with __slots__
            Some(Value::Tuple(pair)) if pair.len() == 2 => {
                pair.iter().find_map(|part| part.get(name))
            }
            _ => None
        }
    }
}

impl Value {
    pub fn text(s: &str) -> Self {
        Value::Text(Rc::from(s))
    }

    pub fn new_list(items: Vec<Value>) -> Self {
        Value::List(Rc::new(RefCell::new(items)))
    }

    pub fn new_dict(items: Vec<(Value, Value)>) -> Self {
        Value::Dict(Rc::new(RefCell::new(items)))
    }

    pub fn new_object(object: Object) -> Self {
        Value::Object(Rc::new(RefCell::new(object)))
    }

    /// The Python type this value was pickled from, qualified by module.
    pub fn type_name(&self) -> String {
        match self {
            Value::None => "builtins.NoneType".to_string(),
            Value::Bool(_) => "builtins.bool".to_string(),
            Value::Int(_) => "builtins.int".to_string(),
            Value::Float(_) => "builtins.float".to_string(),
            Value::Text(_) => "builtins.str".to_string(),
            Value::Bytes(_) => "builtins.bytes".to_string(),
            Value::Tuple(_) => "builtins.tuple".to_string(),
            Value::List(_) => "builtins.list".to_string(),
            Value::Dict(_) => "builtins.dict".to_string(),
            Value::Set(_) => "builtins.set".to_string(),
            Value::Global(_) => "builtins.type".to_string(),
            Value::Object(object) => object.borrow().class_name()
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Bool(b) => Some(*b as i64),
            _ => None
        }
    }

    pub fn as_sequence(&self) -> Option<Vec<Value>> {
        match self {
            Value::Tuple(items) => Some(items.to_vec()),
            Value::List(items) => Some(items.borrow().clone()),
            _ => None
        }
    }

    /// Dictionary lookup by text key. Later insertions win, like a Python dict.
    pub fn get(&self, key: &str) -> Option<Value> {
        match self {
            Value::Dict(items) => items.borrow()
                .iter()
                .rev()
                .find(|(k, _)| k.as_text() == Some(key))
                .map(|(_, v)| v.clone()),
            _ => None
        }
    }
}
