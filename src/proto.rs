//! Mapbox Vector Tile v2 wire messages, written out by hand so the build
//! does not depend on `protoc`. Field numbers follow `vector_tile.proto`.
//! String values and keys are carried as bytes: real-world tiles contain
//! the occasional non-UTF-8 label and decoding must not choke on them.

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Tile {
    #[prost(message, repeated, tag = "3")]
    pub layers: Vec<Layer>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Layer {
    #[prost(uint32, tag = "15")]
    pub version: u32,
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(message, repeated, tag = "2")]
    pub features: Vec<Feature>,
    #[prost(bytes = "vec", repeated, tag = "3")]
    pub keys: Vec<Vec<u8>>,
    #[prost(message, repeated, tag = "4")]
    pub values: Vec<Value>,
    #[prost(uint32, optional, tag = "5")]
    pub extent_field: Option<u32>,
}

impl Layer {
    pub fn extent(&self) -> u32 {
        self.extent_field.unwrap_or(4096)
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Feature {
    #[prost(uint64, optional, tag = "1")]
    pub id: Option<u64>,
    /// Alternating key/value indices into the layer's `keys` and `values`.
    #[prost(uint32, repeated, tag = "2")]
    pub tags: Vec<u32>,
    #[prost(enumeration = "GeomType", optional, tag = "3")]
    pub kind: Option<i32>,
    /// Command-encoded, zigzag-delta geometry stream.
    #[prost(uint32, repeated, tag = "4")]
    pub geometry: Vec<u32>,
}

impl Feature {
    pub fn geom_type(&self) -> GeomType {
        self.kind
            .and_then(|k| GeomType::try_from(k).ok())
            .unwrap_or(GeomType::Unknown)
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Value {
    #[prost(bytes = "vec", optional, tag = "1")]
    pub string_value: Option<Vec<u8>>,
    #[prost(float, optional, tag = "2")]
    pub float_value: Option<f32>,
    #[prost(double, optional, tag = "3")]
    pub double_value: Option<f64>,
    #[prost(int64, optional, tag = "4")]
    pub int_value: Option<i64>,
    #[prost(uint64, optional, tag = "5")]
    pub uint_value: Option<u64>,
    #[prost(sint64, optional, tag = "6")]
    pub sint_value: Option<i64>,
    #[prost(bool, optional, tag = "7")]
    pub bool_value: Option<bool>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum GeomType {
    Unknown = 0,
    Point = 1,
    Linestring = 2,
    Polygon = 3,
}
