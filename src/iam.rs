use serde::Serialize;

use crate::intrinsics::Expr;
use crate::template::ResourceProperties;

pub const ASSUME_ROLE: &str = "sts:AssumeRole";

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum Effect {
    Allow,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Principal {
    Service(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Statement {
    pub effect: Effect,

    pub action: Vec<String>,

    pub principal: Principal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct PolicyDocument {
    pub statement: Vec<Statement>,
}

impl PolicyDocument {
    /// Trust policy letting the given service principal assume the role.
    pub fn assume_role_for(service: &str) -> Self {
        Self {
            statement: vec![Statement {
                effect: Effect::Allow,
                action: vec![ASSUME_ROLE.to_string()],
                principal: Principal::Service(vec![service.to_string()]),
            }],
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Role {
    pub assume_role_policy_document: PolicyDocument,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub managed_policy_arns: Vec<String>,
}

impl ResourceProperties for Role {
    const RESOURCE_TYPE: &'static str = "AWS::IAM::Role";
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct InstanceProfile {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance_profile_name: Option<String>,

    pub roles: Vec<Expr>,
}

impl ResourceProperties for InstanceProfile {
    const RESOURCE_TYPE: &'static str = "AWS::IAM::InstanceProfile";
}
