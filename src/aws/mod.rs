/// AWS resources managed around a kops cluster (via the `aws` CLI)
pub mod client;
pub mod ec2;
pub mod models;
pub mod route53;
pub mod s3;

pub use client::AwsClient;
pub use ec2::VpcManager;
pub use route53::HostedZoneManager;
pub use s3::StateStoreManager;
