// src/extractors/mod.rs
pub mod detail_page;
pub mod master_index;

// Re-export key extraction types for convenience
pub use detail_page::extract_document_url;
pub use master_index::parse_master_index;
