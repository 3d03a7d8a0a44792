pub mod config;
pub mod ec2;
pub mod iam;
pub mod intrinsics;
pub mod stack;
pub mod tags;
pub mod template;
pub mod writer;
