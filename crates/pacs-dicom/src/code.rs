//! 编码序列与签发机构解析

use crate::attributes::Attributes;
use dicom::core::Tag;
use dicom::dictionary_std::tags;
use pacs_core::{Code, IdWithIssuer, Issuer};
use tracing::info;

/// 从单个序列条目解析编码，缺少必需字段时返回 None
pub fn code_from_item(item: &Attributes) -> Option<Code> {
    let value = item
        .get_string(tags::CODE_VALUE)
        .or_else(|| item.get_string(tags::LONG_CODE_VALUE))?;
    let designator = item.get_string(tags::CODING_SCHEME_DESIGNATOR)?;
    let meaning = item.get_string(tags::CODE_MEANING)?;
    Some(Code::new(
        value,
        designator,
        item.get_string(tags::CODING_SCHEME_VERSION),
        meaning,
    ))
}

/// 序列中第一个合法编码
pub fn find_code(attrs: &Attributes, seq_tag: Tag) -> Option<Code> {
    find_codes(attrs, seq_tag).into_iter().next()
}

/// 序列中全部合法编码，非法条目记录后跳过
pub fn find_codes(attrs: &Attributes, seq_tag: Tag) -> Vec<Code> {
    let items = match attrs.get_sequence(seq_tag) {
        Some(items) => items,
        None => return Vec::new(),
    };
    items
        .iter()
        .filter_map(|item| {
            let code = code_from_item(item);
            if code.is_none() {
                info!(
                    "忽略序列 {} 中的非法编码条目: {:?}",
                    crate::attributes::tag_string(seq_tag),
                    item
                );
            }
            code
        })
        .collect()
}

/// 从条目解析签发机构
pub fn issuer_from_item(item: &Attributes) -> Option<Issuer> {
    let issuer = Issuer {
        local_namespace_entity_id: item
            .get_string(tags::LOCAL_NAMESPACE_ENTITY_ID)
            .map(str::to_string),
        universal_entity_id: item.get_string(tags::UNIVERSAL_ENTITY_ID).map(str::to_string),
        universal_entity_id_type: item
            .get_string(tags::UNIVERSAL_ENTITY_ID_TYPE)
            .map(str::to_string),
    };
    if issuer.is_empty() {
        None
    } else {
        Some(issuer)
    }
}

/// 序列首个条目表示的签发机构
pub fn find_issuer(attrs: &Attributes, seq_tag: Tag) -> Option<Issuer> {
    attrs.get_nested(seq_tag).and_then(issuer_from_item)
}

/// 患者ID及其签发机构，没有患者ID时返回 None
pub fn id_with_issuer(attrs: &Attributes) -> Option<IdWithIssuer> {
    let id = attrs.get_string(tags::PATIENT_ID)?;
    let qualifiers = attrs.get_nested(tags::ISSUER_OF_PATIENT_ID_QUALIFIERS_SEQUENCE);
    let issuer = Issuer {
        local_namespace_entity_id: attrs.get_string(tags::ISSUER_OF_PATIENT_ID).map(str::to_string),
        universal_entity_id: qualifiers
            .and_then(|q| q.get_string(tags::UNIVERSAL_ENTITY_ID))
            .map(str::to_string),
        universal_entity_id_type: qualifiers
            .and_then(|q| q.get_string(tags::UNIVERSAL_ENTITY_ID_TYPE))
            .map(str::to_string),
    };
    let issuer = if issuer.is_empty() { None } else { Some(issuer) };
    Some(IdWithIssuer::new(id, issuer))
}

/// 编码写入序列条目
pub fn code_to_item(code: &Code) -> Attributes {
    let mut item = Attributes::new();
    item.set_string(tags::CODE_VALUE, code.value.clone());
    item.set_string(tags::CODING_SCHEME_DESIGNATOR, code.designator.clone());
    if let Some(version) = &code.version {
        item.set_string(tags::CODING_SCHEME_VERSION, version.clone());
    }
    item.set_string(tags::CODE_MEANING, code.meaning.clone());
    item
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_code_skips_illegal_items() {
        let code = Code::new("113001", "DCM", None, "Rejected for Quality Reasons");
        let mut illegal = Attributes::new();
        illegal.set_string(tags::CODE_VALUE, "113001");

        let mut attrs = Attributes::new();
        attrs.set_sequence(
            tags::CONCEPT_NAME_CODE_SEQUENCE,
            vec![illegal, code_to_item(&code)],
        );

        assert_eq!(find_code(&attrs, tags::CONCEPT_NAME_CODE_SEQUENCE), Some(code));
        assert_eq!(find_codes(&attrs, tags::CONCEPT_NAME_CODE_SEQUENCE).len(), 1);
        assert_eq!(find_code(&attrs, tags::PROCEDURE_CODE_SEQUENCE), None);
    }

    #[test]
    fn test_id_with_issuer() {
        let mut attrs = Attributes::new();
        assert_eq!(id_with_issuer(&attrs), None);

        attrs.set_string(tags::PATIENT_ID, "P1");
        assert_eq!(id_with_issuer(&attrs), Some(IdWithIssuer::new("P1", None)));

        attrs.set_string(tags::ISSUER_OF_PATIENT_ID, "HOSPITAL");
        let mut qualifiers = Attributes::new();
        qualifiers.set_string(tags::UNIVERSAL_ENTITY_ID, "1.2.3.4");
        qualifiers.set_string(tags::UNIVERSAL_ENTITY_ID_TYPE, "ISO");
        attrs.set_sequence(tags::ISSUER_OF_PATIENT_ID_QUALIFIERS_SEQUENCE, vec![qualifiers]);

        let pid = id_with_issuer(&attrs).unwrap();
        assert_eq!(pid.to_string(), "P1^^^HOSPITAL&1.2.3.4&ISO");
    }

    #[test]
    fn test_find_issuer() {
        let mut item = Attributes::new();
        item.set_string(tags::LOCAL_NAMESPACE_ENTITY_ID, "RIS");
        let mut attrs = Attributes::new();
        attrs.set_sequence(tags::ISSUER_OF_ACCESSION_NUMBER_SEQUENCE, vec![item]);

        let issuer = find_issuer(&attrs, tags::ISSUER_OF_ACCESSION_NUMBER_SEQUENCE).unwrap();
        assert_eq!(issuer.local_namespace_entity_id.as_deref(), Some("RIS"));
        assert!(find_issuer(&attrs, tags::INSTITUTION_CODE_SEQUENCE).is_none());
    }
}
