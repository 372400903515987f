//! Asset side of the pipeline: resource manifests, the asynchronous loader
//! and its keyed cache, plus CPU decoders for OBJ meshes and images.

pub mod error;
pub mod loader;
pub mod manifest;
pub mod mesh;
pub mod obj;
pub mod texture;

pub use error::{AssetError, AssetResult, ObjParseError};
pub use loader::{Fetch, FileFetcher, LoadStatus, Loader, MemoryFetcher, Resource, Resources};
pub use manifest::{Manifest, ResourceKind, ResourceSpec};
pub use mesh::{MeshData, MeshVertex};
pub use obj::load_obj_mesh;
pub use texture::{TextureData, TextureFormat};
