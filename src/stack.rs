//! The lab stack: a VPC with a public and a private subnet, one security
//! group, an EC2 role and one instance per subnet.

use std::collections::BTreeMap;

use serde_json::json;
use tracing::info;

use crate::config::Config;
use crate::ec2::{
    Instance, InternetGateway, NetworkInterface, Route, RouteTable, SecurityGroup,
    SecurityGroupRule, Subnet, SubnetRouteTableAssociation, Vpc, VpcGatewayAttachment,
};
use crate::iam::{InstanceProfile, PolicyDocument, Role};
use crate::intrinsics::{Expr, REGION, STACK_ID};
use crate::tags::Tags;
use crate::template::{Error, Mapping, Parameter, Resource, Template};

pub const FORMAT_VERSION: &str = "2010-09-09";
// Single spaced, without line-continuation whitespace.
pub const DESCRIPTION: &str = "AWS CloudFormation Template for AWS Exploitation Lab";

pub const REGION_MAP: &str = "RegionMap";
pub const KEY_NAME: &str = "KeyName";
pub const SSH_LOCATION: &str = "SSHLocation";
pub const INSTANCE_TYPE: &str = "InstanceType";

pub const VPC: &str = "VPC";
pub const INSTANCE_PROFILE: &str = "InstanceProfile";
pub const INTERNET_GATEWAY: &str = "InternetGateway";
pub const GATEWAY_ATTACHMENT: &str = "AttachGateway";
pub const ROUTE_TABLE: &str = "RouteTable";
pub const ROUTE: &str = "Route";
pub const SUBNET_ROUTE_TABLE_ASSOCIATION: &str = "SubnetRouteTableAssociation";
pub const SECURITY_GROUP: &str = "InstanceSecurityGroup";

const VPC_CIDR: &str = "10.0.0.0/16";
const PUBLIC_SUBNET_CIDR: &str = "10.0.1.0/24";
const PRIVATE_SUBNET_CIDR: &str = "10.0.2.0/24";
const INTERNAL_CIDR: &str = "10.0.0.0/8";
const ANYWHERE: &str = "0.0.0.0/0";

const READ_ONLY_POLICY: &str = "arn:aws:iam::aws:policy/ReadOnlyAccess";
const EC2_SERVICE: &str = "ec2.amazonaws.com";

const INSTANCE_TYPES: [&str; 7] = [
    "t2.micro",
    "t2.small",
    "t2.medium",
    "m3.medium",
    "m3.large",
    "m3.xlarge",
    "m3.2xlarge",
];

// Identical for now; the private subnet has no route out, so its copy
// cannot reach the package repository until a NAT path exists.
const PUBLIC_INSTANCE_USERDATA: &str = include_str!("userdata/public_instance.sh");
const PRIVATE_INSTANCE_USERDATA: &str = include_str!("userdata/private_instance.sh");

pub fn role_name(service_name: &str) -> String {
    format!("{}EC2Role", service_name)
}

pub fn instance_profile_name(service_name: &str) -> String {
    format!("{}InstanceRole", service_name)
}

pub fn public_subnet_name(service_name: &str) -> String {
    format!("{}SubnetPublic", service_name)
}

pub fn private_subnet_name(service_name: &str) -> String {
    format!("{}SubnetPrivate", service_name)
}

pub fn public_instance_name(service_name: &str) -> String {
    format!("Public{}Instance", service_name)
}

pub fn private_instance_name(service_name: &str) -> String {
    format!("Private{}Instance", service_name)
}

/// Builds the template for one deployment. The service name prefixes the
/// generated names so several deployments can share an account.
pub struct Stack {
    pub service_name: String,

    region_map: BTreeMap<String, String>,
}

struct Parameters {
    key_name: Expr,
    ssh_location: Expr,
    instance_type: Expr,
}

struct Network {
    vpc: Expr,
    public_subnet: Expr,
    private_subnet: Expr,
}

impl Stack {
    pub fn new(config: &Config) -> Self {
        Self {
            service_name: config.service_name.clone(),
            region_map: config.region_map.clone(),
        }
    }

    /// A stack with the default single-region AMI table.
    pub fn named(service_name: &str) -> Self {
        Self::new(&Config {
            service_name: service_name.to_string(),
            ..Default::default()
        })
    }

    pub fn generate_template(&self) -> Result<Template, Error> {
        info!("Generating template for {}", self.service_name);

        let mut template = Template::new();
        template.add_version(FORMAT_VERSION);
        template.add_description(DESCRIPTION);
        template.add_mapping(REGION_MAP, self.region_mapping())?;

        let parameters = add_parameters(&mut template)?;
        let instance_profile = self.add_identity(&mut template)?;
        let network = self.add_network(&mut template)?;
        let security_group = self.add_security_group(&mut template, &network, &parameters)?;
        self.add_instances(
            &mut template,
            &network,
            &parameters,
            &security_group,
            &instance_profile,
        )?;

        template.validate()?;
        info!(
            "Declared {} parameters and {} resources",
            template.parameter_names().len(),
            template.resource_names().len()
        );
        Ok(template)
    }

    fn region_mapping(&self) -> Mapping {
        self.region_map
            .iter()
            .map(|(region, ami)| {
                (
                    region.clone(),
                    BTreeMap::from([(String::from("AMI"), json!(ami))]),
                )
            })
            .collect()
    }

    fn tags(&self, name: Option<String>) -> Tags {
        let tags = Tags::new().with("Application", Expr::reference(STACK_ID));
        match name {
            Some(name) => tags.with("Name", name),
            None => tags,
        }
    }

    fn add_identity(&self, template: &mut Template) -> Result<Expr, Error> {
        let role = template.add_resource(Resource::new(
            role_name(&self.service_name),
            &Role {
                assume_role_policy_document: PolicyDocument::assume_role_for(EC2_SERVICE),
                managed_policy_arns: vec![String::from(READ_ONLY_POLICY)],
            },
        )?)?;

        template.add_resource(Resource::new(
            INSTANCE_PROFILE,
            &InstanceProfile {
                instance_profile_name: Some(instance_profile_name(&self.service_name)),
                roles: vec![role],
            },
        )?)
    }

    fn add_network(&self, template: &mut Template) -> Result<Network, Error> {
        let service_name = &self.service_name;

        let vpc = template.add_resource(Resource::new(
            VPC,
            &Vpc {
                cidr_block: String::from(VPC_CIDR),
                tags: Some(self.tags(None)),
            },
        )?)?;

        let public_subnet = template.add_resource(Resource::new(
            public_subnet_name(service_name),
            &Subnet {
                cidr_block: String::from(PUBLIC_SUBNET_CIDR),
                vpc_id: vpc.clone(),
                map_public_ip_on_launch: Some(true),
                tags: Some(self.tags(Some(format!("{}Subnet_public", service_name)))),
            },
        )?)?;

        let private_subnet = template.add_resource(Resource::new(
            private_subnet_name(service_name),
            &Subnet {
                cidr_block: String::from(PRIVATE_SUBNET_CIDR),
                vpc_id: vpc.clone(),
                map_public_ip_on_launch: Some(false),
                tags: Some(self.tags(Some(format!("{}Subnet_private", service_name)))),
            },
        )?)?;

        let internet_gateway = template.add_resource(Resource::new(
            INTERNET_GATEWAY,
            &InternetGateway {
                tags: Some(self.tags(Some(format!("{}InternetGateway", service_name)))),
            },
        )?)?;

        template.add_resource(Resource::new(
            GATEWAY_ATTACHMENT,
            &VpcGatewayAttachment {
                vpc_id: vpc.clone(),
                internet_gateway_id: internet_gateway.clone(),
            },
        )?)?;

        let route_table = template.add_resource(Resource::new(
            ROUTE_TABLE,
            &RouteTable {
                vpc_id: vpc.clone(),
                tags: Some(self.tags(Some(format!("{}RouteTable", service_name)))),
            },
        )?)?;

        // The gateway is only usable once it is attached to the VPC.
        template.add_resource(
            Resource::new(
                ROUTE,
                &Route {
                    route_table_id: route_table.clone(),
                    destination_cidr_block: String::from(ANYWHERE),
                    gateway_id: Some(internet_gateway),
                },
            )?
            .depends_on(GATEWAY_ATTACHMENT),
        )?;

        // Only the public subnet gets the internet route.
        template.add_resource(Resource::new(
            SUBNET_ROUTE_TABLE_ASSOCIATION,
            &SubnetRouteTableAssociation {
                route_table_id: route_table,
                subnet_id: public_subnet.clone(),
            },
        )?)?;

        Ok(Network {
            vpc,
            public_subnet,
            private_subnet,
        })
    }

    fn add_security_group(
        &self,
        template: &mut Template,
        network: &Network,
        parameters: &Parameters,
    ) -> Result<Expr, Error> {
        template.add_resource(Resource::new(
            SECURITY_GROUP,
            &SecurityGroup {
                group_description: format!("{}SecurityGroup", self.service_name),
                security_group_ingress: vec![
                    SecurityGroupRule::tcp(22, 22, parameters.ssh_location.clone()),
                    SecurityGroupRule::tcp(80, 80, ANYWHERE),
                    SecurityGroupRule::tcp(443, 443, ANYWHERE),
                    SecurityGroupRule::tcp(0, 65535, INTERNAL_CIDR),
                ],
                vpc_id: network.vpc.clone(),
                tags: None,
            },
        )?)
    }

    fn add_instances(
        &self,
        template: &mut Template,
        network: &Network,
        parameters: &Parameters,
        security_group: &Expr,
        instance_profile: &Expr,
    ) -> Result<(), Error> {
        let service_name = &self.service_name;
        let instance = |subnet: &Expr, public: bool, userdata: &str, name: String| Instance {
            image_id: Expr::find_in_map(REGION_MAP, Expr::reference(REGION), "AMI"),
            instance_type: parameters.instance_type.clone(),
            key_name: parameters.key_name.clone(),
            network_interfaces: vec![NetworkInterface {
                device_index: String::from("0"),
                subnet_id: subnet.clone(),
                group_set: vec![security_group.clone()],
                associate_public_ip_address: public.then_some(true),
                delete_on_termination: Some(true),
            }],
            iam_instance_profile: Some(instance_profile.clone()),
            user_data: Some(Expr::base64(userdata)),
            tags: Some(self.tags(Some(name))),
        };

        template.add_resource(Resource::new(
            public_instance_name(service_name),
            &instance(
                &network.public_subnet,
                true,
                PUBLIC_INSTANCE_USERDATA,
                format!("{}PublicInstance", service_name),
            ),
        )?)?;

        template.add_resource(Resource::new(
            private_instance_name(service_name),
            &instance(
                &network.private_subnet,
                false,
                PRIVATE_INSTANCE_USERDATA,
                format!("{}PrivateInstance", service_name),
            ),
        )?)?;

        Ok(())
    }
}

fn add_parameters(template: &mut Template) -> Result<Parameters, Error> {
    let key_name = template.add_parameter(
        KEY_NAME,
        Parameter {
            parameter_type: String::from("AWS::EC2::KeyPair::KeyName"),
            description: Some(String::from(
                "Name of an existing EC2 KeyPair to enable SSH access to the instance",
            )),
            constraint_description: Some(String::from(
                "must be the name of an existing EC2 KeyPair.",
            )),
            ..Default::default()
        },
    )?;

    let ssh_location = template.add_parameter(
        SSH_LOCATION,
        Parameter {
            parameter_type: String::from("String"),
            description: Some(String::from(
                "The IP address range that can be used to SSH to the EC2 instances",
            )),
            min_length: Some(9),
            max_length: Some(18),
            default: Some(String::from("0.0.0.0/32")),
            allowed_pattern: Some(String::from(
                r"(\d{1,3})\.(\d{1,3})\.(\d{1,3})\.(\d{1,3})/(\d{1,2})",
            )),
            constraint_description: Some(String::from(
                "must be a valid IP CIDR range of the form x.x.x.x/x.",
            )),
            ..Default::default()
        },
    )?;

    let instance_type = template.add_parameter(
        INSTANCE_TYPE,
        Parameter {
            parameter_type: String::from("String"),
            description: Some(String::from("WebServer EC2 instance type")),
            default: Some(String::from("t2.micro")),
            allowed_values: INSTANCE_TYPES.iter().map(|t| t.to_string()).collect(),
            constraint_description: Some(String::from("must be a valid EC2 instance type.")),
            ..Default::default()
        },
    )?;

    Ok(Parameters {
        key_name,
        ssh_location,
        instance_type,
    })
}

/// Builds the template for `service_name` and renders it as JSON.
pub fn generate_template(service_name: &str) -> Result<String, Error> {
    Stack::named(service_name).generate_template()?.to_json()
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use serde_json::{json, Value};

    use super::*;
    use crate::template::Violation;

    fn parsed(service_name: &str) -> Value {
        serde_json::from_str(&generate_template(service_name).unwrap()).unwrap()
    }

    fn sorted_keys(value: &Value) -> Vec<&str> {
        let mut keys: Vec<&str> = value.as_object().unwrap().keys().map(String::as_str).collect();
        keys.sort();
        keys
    }

    #[test]
    fn output_is_deterministic() {
        assert_eq!(
            generate_template("bluelizard").unwrap(),
            generate_template("bluelizard").unwrap()
        );
    }

    #[test]
    fn top_level_sections() {
        let template = parsed("acme");

        assert_eq!(
            vec!["AWSTemplateFormatVersion", "Description", "Mappings", "Parameters", "Resources"],
            sorted_keys(&template)
        );
        assert_eq!(json!("2010-09-09"), template["AWSTemplateFormatVersion"]);
        assert_eq!(
            json!({ "us-east-2": { "AMI": "ami-6a003c0f" } }),
            template["Mappings"]["RegionMap"]
        );
    }

    #[test]
    fn declares_exactly_the_expected_names() {
        let template = parsed("acme");

        assert_eq!(
            vec!["InstanceType", "KeyName", "SSHLocation"],
            sorted_keys(&template["Parameters"])
        );

        let mut expected = vec![
            "AttachGateway",
            "InstanceProfile",
            "InstanceSecurityGroup",
            "InternetGateway",
            "PrivateacmeInstance",
            "PublicacmeInstance",
            "Route",
            "RouteTable",
            "SubnetRouteTableAssociation",
            "VPC",
            "acmeEC2Role",
            "acmeSubnetPrivate",
            "acmeSubnetPublic",
        ];
        expected.sort();
        assert_eq!(expected, sorted_keys(&template["Resources"]));

        let built = Stack::named("acme").generate_template().unwrap();
        assert_eq!(sorted_keys(&template["Parameters"]), built.parameter_names());
        assert_eq!(expected, built.resource_names());
    }

    #[test]
    fn descriptions_are_single_spaced() {
        let template = parsed("acme");

        assert_eq!(json!(DESCRIPTION), template["Description"]);
        assert_eq!(
            json!("The IP address range that can be used to SSH to the EC2 instances"),
            template["Parameters"]["SSHLocation"]["Description"]
        );
    }

    #[test]
    fn names_follow_the_service_name() {
        let template = parsed("acme");
        let resources = &template["Resources"];

        assert_eq!(json!("AWS::EC2::Subnet"), resources["acmeSubnetPublic"]["Type"]);
        assert_eq!(
            json!("acmeInstanceRole"),
            resources["InstanceProfile"]["Properties"]["InstanceProfileName"]
        );
        assert_eq!(
            json!([{ "Ref": "acmeEC2Role" }]),
            resources["InstanceProfile"]["Properties"]["Roles"]
        );
        assert_eq!(
            json!("acmeSecurityGroup"),
            resources["InstanceSecurityGroup"]["Properties"]["GroupDescription"]
        );
    }

    #[test]
    fn only_the_public_subnet_is_routed() {
        let template = parsed("acme");
        let association = &template["Resources"]["SubnetRouteTableAssociation"]["Properties"];

        assert_eq!(json!({ "Ref": "acmeSubnetPublic" }), association["SubnetId"]);
        assert_ne!(json!({ "Ref": "acmeSubnetPrivate" }), association["SubnetId"]);
        assert_eq!(json!({ "Ref": "RouteTable" }), association["RouteTableId"]);

        let associations = template["Resources"]
            .as_object()
            .unwrap()
            .values()
            .filter(|resource| resource["Type"] == json!("AWS::EC2::SubnetRouteTableAssociation"))
            .count();
        assert_eq!(1, associations);
    }

    #[test]
    fn subnets_differ_in_public_addressing() {
        let template = parsed("acme");
        let resources = &template["Resources"];

        assert_eq!(
            json!(true),
            resources["acmeSubnetPublic"]["Properties"]["MapPublicIpOnLaunch"]
        );
        assert_eq!(
            json!(false),
            resources["acmeSubnetPrivate"]["Properties"]["MapPublicIpOnLaunch"]
        );
        assert_eq!(
            json!([
                { "Key": "Application", "Value": { "Ref": "AWS::StackId" } },
                { "Key": "Name", "Value": "acmeSubnet_private" }
            ]),
            resources["acmeSubnetPrivate"]["Properties"]["Tags"]
        );
    }

    #[test]
    fn default_route_waits_for_the_attachment() {
        let template = parsed("acme");
        let route = &template["Resources"]["Route"];

        assert_eq!(json!("AttachGateway"), route["DependsOn"]);
        assert_eq!(json!("0.0.0.0/0"), route["Properties"]["DestinationCidrBlock"]);
        assert_eq!(json!({ "Ref": "InternetGateway" }), route["Properties"]["GatewayId"]);
    }

    #[test]
    fn security_group_has_four_ingress_rules() {
        let template = parsed("acme");
        let properties = &template["Resources"]["InstanceSecurityGroup"]["Properties"];
        let ingress = properties["SecurityGroupIngress"]
            .as_array()
            .unwrap()
            .clone();

        let rules: Vec<(Value, Value, Value)> = ingress
            .iter()
            .map(|rule| {
                assert_eq!(json!("tcp"), rule["IpProtocol"]);
                (rule["FromPort"].clone(), rule["ToPort"].clone(), rule["CidrIp"].clone())
            })
            .collect();

        assert_eq!(
            vec![
                (json!(22), json!(22), json!({ "Ref": "SSHLocation" })),
                (json!(80), json!(80), json!("0.0.0.0/0")),
                (json!(443), json!(443), json!("0.0.0.0/0")),
                (json!(0), json!(65535), json!("10.0.0.0/8")),
            ],
            rules
        );
        assert_eq!(
            None,
            template["Resources"]["InstanceSecurityGroup"]["Properties"].get("SecurityGroupEgress")
        );
    }

    #[test]
    fn instances_share_parameters_and_profile() {
        let template = parsed("acme");
        let public = &template["Resources"]["PublicacmeInstance"]["Properties"];
        let private = &template["Resources"]["PrivateacmeInstance"]["Properties"];

        for instance in [public, private] {
            assert_eq!(
                json!({ "Fn::FindInMap": ["RegionMap", { "Ref": "AWS::Region" }, "AMI"] }),
                instance["ImageId"]
            );
            assert_eq!(json!({ "Ref": "InstanceType" }), instance["InstanceType"]);
            assert_eq!(json!({ "Ref": "KeyName" }), instance["KeyName"]);
            assert_eq!(json!({ "Ref": "InstanceProfile" }), instance["IamInstanceProfile"]);
            assert_eq!(
                json!([{ "Ref": "InstanceSecurityGroup" }]),
                instance["NetworkInterfaces"][0]["GroupSet"]
            );
        }

        assert_eq!(
            json!({ "Ref": "acmeSubnetPublic" }),
            public["NetworkInterfaces"][0]["SubnetId"]
        );
        assert_eq!(json!(true), public["NetworkInterfaces"][0]["AssociatePublicIpAddress"]);
        assert_eq!(
            json!({ "Ref": "acmeSubnetPrivate" }),
            private["NetworkInterfaces"][0]["SubnetId"]
        );
        assert_eq!(None, private["NetworkInterfaces"][0].get("AssociatePublicIpAddress"));

        assert_eq!(json!("acmePublicInstance"), public["Tags"][1]["Value"]);
        assert_eq!(json!("acmePrivateInstance"), private["Tags"][1]["Value"]);
    }

    #[test]
    fn userdata_is_wrapped_in_base64() {
        let template = parsed("acme");
        let user_data = &template["Resources"]["PublicacmeInstance"]["Properties"]["UserData"];

        let script = user_data["Fn::Base64"].as_str().unwrap();
        assert_eq!(true, script.starts_with("#!/bin/bash\n"));
        assert_eq!(true, script.contains("apt-get install -y docker-ce"));
    }

    #[test]
    fn role_trusts_ec2_with_read_only_access() {
        let template = parsed("acme");
        let role = &template["Resources"]["acmeEC2Role"]["Properties"];

        assert_eq!(
            json!(["arn:aws:iam::aws:policy/ReadOnlyAccess"]),
            role["ManagedPolicyArns"]
        );
        assert_eq!(
            json!({ "Service": ["ec2.amazonaws.com"] }),
            role["AssumeRolePolicyDocument"]["Statement"][0]["Principal"]
        );
    }

    #[test]
    fn parameter_constraints_are_declared() {
        let template = parsed("acme");
        let parameters = &template["Parameters"];

        assert_eq!(json!("AWS::EC2::KeyPair::KeyName"), parameters["KeyName"]["Type"]);
        assert_eq!(json!(9), parameters["SSHLocation"]["MinLength"]);
        assert_eq!(json!(18), parameters["SSHLocation"]["MaxLength"]);
        assert_eq!(json!("0.0.0.0/32"), parameters["SSHLocation"]["Default"]);
        assert_eq!(json!("t2.micro"), parameters["InstanceType"]["Default"]);
        assert_eq!(7, parameters["InstanceType"]["AllowedValues"].as_array().unwrap().len());
    }

    #[test]
    fn instance_type_outside_allow_list_is_rejected() {
        let template = Stack::named("acme").generate_template().unwrap();
        let mut values = BTreeMap::from([
            (String::from(KEY_NAME), String::from("lab-key")),
            (String::from(INSTANCE_TYPE), String::from("c5.large")),
        ]);

        assert_eq!(
            Err(Error::ParameterValue {
                name: String::from(INSTANCE_TYPE),
                violation: Violation::NotAllowed(String::from("c5.large")),
            }),
            template.validate_parameter_values(&values)
        );

        values.insert(String::from(INSTANCE_TYPE), String::from("t2.small"));
        values.insert(String::from(SSH_LOCATION), String::from("203.0.113.7/32"));
        assert_eq!(Ok(()), template.validate_parameter_values(&values));
    }

    #[test]
    fn extra_regions_extend_the_mapping() {
        let config = Config {
            service_name: String::from("acme"),
            region_map: BTreeMap::from([
                (String::from("us-east-2"), String::from("ami-6a003c0f")),
                (String::from("eu-west-1"), String::from("ami-0a8e758f5e873d1c1")),
            ]),
            ..Default::default()
        };

        let template = Stack::new(&config).generate_template().unwrap();
        let mapping = template.mapping(REGION_MAP).unwrap();
        assert_eq!(
            vec!["eu-west-1", "us-east-2"],
            mapping.keys().map(String::as_str).collect::<Vec<_>>()
        );
    }

    #[test]
    fn invalid_service_name_fails_the_build() {
        let result = Stack::named("acme-lab").generate_template();

        assert_eq!(
            Err(Error::InvalidName(String::from("acme-labEC2Role"))),
            result.map(|_| ())
        );
    }
}
