//! DICOM数据解析器
//!
//! 读取DICOM文件并转换为规范化的属性集

use crate::attributes::{AttrValue, Attributes};
use dicom::core::header::Header;
use dicom::core::value::Value;
use dicom::dictionary_std::tags;
use dicom::object::{open_file, InMemDicomObject};
use pacs_core::{PacsError, Result};
use std::path::Path;
use tracing::{debug, error, info};

/// 解析后的DICOM对象
#[derive(Debug, Clone)]
pub struct ParsedDicomObject {
    pub attributes: Attributes,
    pub transfer_syntax_uid: String,
}

/// DICOM数据解析器
pub struct DicomParser;

impl DicomParser {
    /// 解析DICOM文件
    pub fn parse_file<P: AsRef<Path>>(file_path: P) -> Result<ParsedDicomObject> {
        let file_path = file_path.as_ref();
        info!("开始解析DICOM文件: {:?}", file_path);

        let obj = open_file(file_path).map_err(|e| {
            error!("DICOM文件解析失败: {:?}", e);
            PacsError::DicomParseError(format!("无法解析DICOM文件 {:?}: {}", file_path, e))
        })?;

        let transfer_syntax_uid = obj.meta().transfer_syntax().to_string();
        let attributes = Self::to_attributes(&obj);
        debug!(
            "成功提取 {} 个属性, 传输语法: {}",
            attributes.len(),
            transfer_syntax_uid
        );

        Ok(ParsedDicomObject {
            attributes,
            transfer_syntax_uid,
        })
    }

    /// 将数据集转换为属性集，像素数据不保留
    pub fn to_attributes(obj: &InMemDicomObject) -> Attributes {
        let mut attrs = Attributes::new();
        for element in obj.iter() {
            let tag = element.tag();
            if tag == tags::PIXEL_DATA {
                continue;
            }
            match element.value() {
                Value::Primitive(value) => {
                    let values = value
                        .to_multi_str()
                        .iter()
                        .map(|s| s.trim_end_matches(['\0', ' ']).trim_start().to_string())
                        .collect();
                    attrs.insert(tag, AttrValue::Strings(values));
                }
                Value::Sequence(seq) => {
                    let items = seq.items().iter().map(Self::to_attributes).collect();
                    attrs.insert(tag, AttrValue::Sequence(items));
                }
                Value::PixelSequence(_) => {}
            }
        }
        attrs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dicom::core::value::DataSetSequence;
    use dicom::core::{DataElement, PrimitiveValue, VR};

    #[test]
    fn test_to_attributes() {
        let item = InMemDicomObject::from_element_iter([
            DataElement::new(tags::CODE_VALUE, VR::SH, PrimitiveValue::from("113001")),
            DataElement::new(tags::CODING_SCHEME_DESIGNATOR, VR::SH, PrimitiveValue::from("DCM ")),
        ]);
        let obj = InMemDicomObject::from_element_iter([
            DataElement::new(tags::PATIENT_NAME, VR::PN, PrimitiveValue::from("Doe^John ")),
            DataElement::new(tags::SOP_INSTANCE_UID, VR::UI, PrimitiveValue::from("1.2.3\0")),
            DataElement::new(tags::ROWS, VR::US, PrimitiveValue::from(512_u16)),
            DataElement::new(
                tags::CONCEPT_NAME_CODE_SEQUENCE,
                VR::SQ,
                DataSetSequence::from(vec![item]),
            ),
        ]);

        let attrs = DicomParser::to_attributes(&obj);
        assert_eq!(attrs.get_string(tags::PATIENT_NAME), Some("Doe^John"));
        assert_eq!(attrs.get_string(tags::SOP_INSTANCE_UID), Some("1.2.3"));
        assert_eq!(attrs.get_string(tags::ROWS), Some("512"));
        let code = attrs
            .get_nested(tags::CONCEPT_NAME_CODE_SEQUENCE)
            .expect("sequence item");
        assert_eq!(code.get_string(tags::CODING_SCHEME_DESIGNATOR), Some("DCM"));
    }

    #[test]
    fn test_parse_missing_file() {
        let err = DicomParser::parse_file("/nonexistent/file.dcm").unwrap_err();
        assert!(matches!(err, PacsError::DicomParseError(_)));
    }
}
