pub mod edit;
pub mod ls;
pub mod read;

pub use edit::EditTool;
pub use ls::ListDirTool;
pub use read::ReadFileTool;
