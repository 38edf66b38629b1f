/// One persisted configuration value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigItem {
  /// Property name (primary key), e.g. "PingInfo"
  pub property_name: String,
  /// JSON-encoded value
  pub value: String,
}
