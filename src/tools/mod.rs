//! 工具箱：PubMed 文献检索、网页读取；均由各自的熔断器保护

pub mod pubmed;
pub mod traits;
pub mod web_reader;

pub use pubmed::{Article, PubMedTool, PUBMED_BASE_URL};
pub use traits::Tool;
pub use web_reader::WebReaderTool;
