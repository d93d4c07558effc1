//! AWS-related code shared by different modules.

use aws_config::{BehaviorVersion, Region};

use crate::prelude::*;

/// Load the user's AWS configuration using standard conventions, optionally
/// overriding the region.
pub async fn load_aws_config(region: Option<&str>) -> Result<aws_config::SdkConfig> {
    let mut loader = aws_config::defaults(BehaviorVersion::v2025_01_17());
    if let Some(region) = region {
        loader = loader.region(Region::new(region.to_owned()));
    }
    Ok(loader.load().await)
}
