/// AWS CLI JSON output models
use serde::Deserialize;

/// Key/value tag attached to an EC2 resource
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Tag {
    pub key: String,
    pub value: String,
}

/// VPC as returned by `aws ec2 describe-vpcs`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Vpc {
    pub vpc_id: String,
    #[serde(default)]
    pub cidr_block: Option<String>,
    #[serde(default)]
    pub tags: Vec<Tag>,
}

impl Vpc {
    /// Value of the tag named `key`
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|t| t.key == key)
            .map(|t| t.value.as_str())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DescribeVpcsResponse {
    #[serde(default)]
    pub vpcs: Vec<Vpc>,
}

/// Route53 hosted zone
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct HostedZone {
    /// Fully qualified id, e.g. `/hostedzone/Z123`
    pub id: String,
    /// Zone name with trailing dot, e.g. `demo.internal.`
    pub name: String,
    #[serde(default)]
    pub config: Option<HostedZoneConfig>,
}

impl HostedZone {
    /// Id without the `/hostedzone/` prefix
    pub fn short_id(&self) -> &str {
        self.id.trim_start_matches("/hostedzone/")
    }

    /// Whether this zone is `dns_name`, ignoring the trailing dot and case
    pub fn matches_name(&self, dns_name: &str) -> bool {
        self.name
            .trim_end_matches('.')
            .eq_ignore_ascii_case(dns_name.trim_end_matches('.'))
    }

    pub fn is_private(&self) -> bool {
        self.config.as_ref().map(|c| c.private_zone).unwrap_or(false)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct HostedZoneConfig {
    #[serde(default)]
    pub private_zone: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ListHostedZonesByNameResponse {
    #[serde(default)]
    pub hosted_zones: Vec<HostedZone>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CreateHostedZoneResponse {
    pub hosted_zone: HostedZone,
}

/// VPC association listed on a private hosted zone
#[derive(Debug, Clone, Deserialize)]
pub struct ZoneVpc {
    #[serde(rename = "VPCRegion")]
    pub region: String,
    #[serde(rename = "VPCId")]
    pub vpc_id: String,
}

#[derive(Debug, Deserialize)]
pub struct GetHostedZoneResponse {
    #[serde(rename = "HostedZone")]
    pub hosted_zone: HostedZone,
    #[serde(rename = "VPCs", default)]
    pub vpcs: Vec<ZoneVpc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_describe_vpcs() {
        let json = r#"{
            "Vpcs": [{
                "CidrBlock": "172.20.0.0/16",
                "VpcId": "vpc-0abc",
                "State": "available",
                "Tags": [{"Key": "KubernetesCluster", "Value": "demo.k8s.local"}]
            }]
        }"#;
        let resp: DescribeVpcsResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.vpcs.len(), 1);
        assert_eq!(resp.vpcs[0].vpc_id, "vpc-0abc");
        assert_eq!(resp.vpcs[0].tag("KubernetesCluster"), Some("demo.k8s.local"));
        assert_eq!(resp.vpcs[0].tag("Name"), None);
    }

    #[test]
    fn test_hosted_zone_helpers() {
        let json = r#"{
            "HostedZones": [{
                "Id": "/hostedzone/Z123",
                "Name": "Demo.Internal.",
                "CallerReference": "demo",
                "Config": {"PrivateZone": true},
                "ResourceRecordSetCount": 2
            }],
            "DNSName": "demo.internal",
            "IsTruncated": false,
            "MaxItems": "1"
        }"#;
        let resp: ListHostedZonesByNameResponse = serde_json::from_str(json).unwrap();
        let zone = &resp.hosted_zones[0];
        assert_eq!(zone.short_id(), "Z123");
        assert!(zone.matches_name("demo.internal"));
        assert!(!zone.matches_name("other.internal"));
        assert!(zone.is_private());
    }

    #[test]
    fn test_parse_get_hosted_zone() {
        let json = r#"{
            "HostedZone": {"Id": "/hostedzone/Z123", "Name": "demo.internal."},
            "VPCs": [{"VPCRegion": "us-east-1", "VPCId": "vpc-0abc"}]
        }"#;
        let resp: GetHostedZoneResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.vpcs[0].vpc_id, "vpc-0abc");
        assert!(!resp.hosted_zone.is_private());
    }
}
