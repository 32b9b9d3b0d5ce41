#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum TransportErrorKind {
    InvalidEndpoint,
    UnsupportedTarget,
    Descriptor,
    MetadataKey,
    MetadataValue,
    InvalidMethodPath,
    NoRuntime,
    NotConnected,
    StreamClosed,
}
