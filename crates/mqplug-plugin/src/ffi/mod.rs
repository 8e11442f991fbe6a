//! Artifact ABI shared by the host loader and `export_plugin!`.

pub mod abi;

pub use abi::{ABI_VERSION, DECLARATION_SYMBOL, PanicPayload, PluginDeclaration};
