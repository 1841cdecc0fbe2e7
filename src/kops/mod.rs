/// kops cluster management on AWS
pub mod client;
pub mod ssh_key;

pub use client::KopsClient;
