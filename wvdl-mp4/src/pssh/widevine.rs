// Hand written equivalent of the `WidevineCencHeader` message from the
// Widevine license protocol definition. Only the fields used in requests are kept.

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum Algorithm {
    Unencrypted = 0,
    Aesctr = 1,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct WidevineCencHeader {
    #[prost(enumeration = "Algorithm", optional, tag = "1")]
    pub algorithm: Option<i32>,
    #[prost(bytes = "vec", repeated, tag = "2")]
    pub key_id: Vec<Vec<u8>>,
    #[prost(string, optional, tag = "3")]
    pub provider: Option<String>,
    #[prost(bytes = "vec", optional, tag = "4")]
    pub content_id: Option<Vec<u8>>,
    #[prost(string, optional, tag = "6")]
    pub policy: Option<String>,
}
