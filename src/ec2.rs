//! EC2 resource schemas used by the lab template.
//!
//! Field names follow the CloudFormation property names; optional
//! properties are left out of the rendered template when unset.

use serde::Serialize;

use crate::intrinsics::Expr;
use crate::tags::Tags;
use crate::template::ResourceProperties;

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Vpc {
    pub cidr_block: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Tags>,
}

impl ResourceProperties for Vpc {
    const RESOURCE_TYPE: &'static str = "AWS::EC2::VPC";
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Subnet {
    pub cidr_block: String,

    pub vpc_id: Expr,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub map_public_ip_on_launch: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Tags>,
}

impl ResourceProperties for Subnet {
    const RESOURCE_TYPE: &'static str = "AWS::EC2::Subnet";
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct InternetGateway {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Tags>,
}

impl ResourceProperties for InternetGateway {
    const RESOURCE_TYPE: &'static str = "AWS::EC2::InternetGateway";
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct VpcGatewayAttachment {
    pub vpc_id: Expr,

    pub internet_gateway_id: Expr,
}

impl ResourceProperties for VpcGatewayAttachment {
    const RESOURCE_TYPE: &'static str = "AWS::EC2::VPCGatewayAttachment";
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct RouteTable {
    pub vpc_id: Expr,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Tags>,
}

impl ResourceProperties for RouteTable {
    const RESOURCE_TYPE: &'static str = "AWS::EC2::RouteTable";
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Route {
    pub route_table_id: Expr,

    pub destination_cidr_block: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway_id: Option<Expr>,
}

impl ResourceProperties for Route {
    const RESOURCE_TYPE: &'static str = "AWS::EC2::Route";
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct SubnetRouteTableAssociation {
    pub route_table_id: Expr,

    pub subnet_id: Expr,
}

impl ResourceProperties for SubnetRouteTableAssociation {
    const RESOURCE_TYPE: &'static str = "AWS::EC2::SubnetRouteTableAssociation";
}

/// One ingress rule. Ports are inclusive.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct SecurityGroupRule {
    pub ip_protocol: String,

    pub from_port: u16,

    pub to_port: u16,

    pub cidr_ip: Expr,
}

impl SecurityGroupRule {
    pub fn tcp(from_port: u16, to_port: u16, cidr_ip: impl Into<Expr>) -> Self {
        Self {
            ip_protocol: String::from("tcp"),
            from_port,
            to_port,
            cidr_ip: cidr_ip.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct SecurityGroup {
    pub group_description: String,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub security_group_ingress: Vec<SecurityGroupRule>,

    pub vpc_id: Expr,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Tags>,
}

impl ResourceProperties for SecurityGroup {
    const RESOURCE_TYPE: &'static str = "AWS::EC2::SecurityGroup";
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct NetworkInterface {
    pub device_index: String,

    pub subnet_id: Expr,

    pub group_set: Vec<Expr>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub associate_public_ip_address: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub delete_on_termination: Option<bool>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Instance {
    pub image_id: Expr,

    pub instance_type: Expr,

    pub key_name: Expr,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub network_interfaces: Vec<NetworkInterface>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub iam_instance_profile: Option<Expr>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_data: Option<Expr>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Tags>,
}

impl ResourceProperties for Instance {
    const RESOURCE_TYPE: &'static str = "AWS::EC2::Instance";
}
