use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};

pub const STACK_ID: &str = "AWS::StackId";
pub const REGION: &str = "AWS::Region";

/// Pseudo parameters the template refers to. CloudFormation resolves these
/// without a matching declaration.
pub const PSEUDO_PARAMETERS: [&str; 2] = [STACK_ID, REGION];

/// A property value: either a literal or an intrinsic function the deploying
/// system evaluates.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    String(String),
    Ref(String),
    FindInMap {
        map_name: String,
        top_level_key: Box<Expr>,
        second_level_key: String,
    },
    Base64(Box<Expr>),
}

impl Expr {
    pub fn reference(name: impl Into<String>) -> Self {
        Expr::Ref(name.into())
    }

    pub fn find_in_map(
        map_name: impl Into<String>,
        top_level_key: Expr,
        second_level_key: impl Into<String>,
    ) -> Self {
        Expr::FindInMap {
            map_name: map_name.into(),
            top_level_key: Box::new(top_level_key),
            second_level_key: second_level_key.into(),
        }
    }

    pub fn base64(value: impl Into<Expr>) -> Self {
        Expr::Base64(Box::new(value.into()))
    }
}

impl From<&str> for Expr {
    fn from(value: &str) -> Self {
        Expr::String(value.to_string())
    }
}

impl From<String> for Expr {
    fn from(value: String) -> Self {
        Expr::String(value)
    }
}

impl Serialize for Expr {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Expr::String(value) => serializer.serialize_str(value),
            Expr::Ref(name) => single_entry(serializer, "Ref", name),
            Expr::FindInMap {
                map_name,
                top_level_key,
                second_level_key,
            } => single_entry(
                serializer,
                "Fn::FindInMap",
                &(map_name, top_level_key, second_level_key),
            ),
            Expr::Base64(value) => single_entry(serializer, "Fn::Base64", value),
        }
    }
}

fn single_entry<S, V>(serializer: S, function: &str, value: &V) -> Result<S::Ok, S::Error>
where
    S: Serializer,
    V: Serialize + ?Sized,
{
    let mut map = serializer.serialize_map(Some(1))?;
    map.serialize_entry(function, value)?;
    map.end()
}
