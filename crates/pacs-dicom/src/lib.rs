//! # DICOM数据模块
//!
//! 提供DICOM属性集、编码序列解析以及DICOM文件解析。

pub mod attributes;
pub mod code;
pub mod parser;

pub use attributes::{AttrValue, AttributeFilter, Attributes, UpdateInfo};
pub use dicom::core::Tag;
pub use dicom::dictionary_std::tags;
pub use parser::{DicomParser, ParsedDicomObject};

/// Key Object Selection Document Storage，拒绝说明使用的SOP类
pub const KEY_OBJECT_SELECTION_DOCUMENT_STORAGE: &str = "1.2.840.10008.5.1.4.1.1.88.59";
