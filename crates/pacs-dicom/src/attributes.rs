//! DICOM属性集
//!
//! 按标准DICOM标签索引的规范化属性集合，支持嵌套序列，
//! 以及按属性过滤器选择和按更新策略合并属性。

use dicom::core::Tag;
use dicom::dictionary_std::tags;
use pacs_core::UpdatePolicy;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;

/// 属性值：字符串多值或序列
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    Strings(Vec<String>),
    Sequence(Vec<Attributes>),
}

impl AttrValue {
    /// 没有值或只有空字符串
    pub fn is_empty(&self) -> bool {
        match self {
            AttrValue::Strings(values) => values.iter().all(|v| v.is_empty()),
            AttrValue::Sequence(items) => items.is_empty(),
        }
    }
}

/// 属性集
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Attributes {
    elements: BTreeMap<Tag, AttrValue>,
}

/// 属性更新结果，用于记录日志
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateInfo {
    /// 被覆盖的标签
    pub modified: Vec<Tag>,
    /// 新补充的标签
    pub supplemented: Vec<Tag>,
}

impl UpdateInfo {
    pub fn is_empty(&self) -> bool {
        self.modified.is_empty() && self.supplemented.is_empty()
    }
}

impl fmt::Display for UpdateInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "modified=[{}], supplemented=[{}]",
            tag_list(&self.modified),
            tag_list(&self.supplemented)
        )
    }
}

/// 格式化标签为 (GGGG,EEEE)
pub fn tag_string(tag: Tag) -> String {
    format!("({:04X},{:04X})", tag.group(), tag.element())
}

fn tag_list(tags: &[Tag]) -> String {
    tags.iter().map(|t| tag_string(*t)).collect::<Vec<_>>().join(", ")
}

fn tag_key(tag: Tag) -> String {
    format!("{:04X}{:04X}", tag.group(), tag.element())
}

fn parse_tag_key(key: &str) -> Option<Tag> {
    if key.len() != 8 || !key.is_ascii() {
        return None;
    }
    let group = u16::from_str_radix(key.get(..4)?, 16).ok()?;
    let element = u16::from_str_radix(key.get(4..)?, 16).ok()?;
    Some(Tag(group, element))
}

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn contains(&self, tag: Tag) -> bool {
        self.elements.contains_key(&tag)
    }

    pub fn tags(&self) -> Vec<Tag> {
        self.elements.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Tag, &AttrValue)> {
        self.elements.iter()
    }

    pub fn get(&self, tag: Tag) -> Option<&AttrValue> {
        self.elements.get(&tag)
    }

    pub fn insert(&mut self, tag: Tag, value: AttrValue) {
        self.elements.insert(tag, value);
    }

    pub fn remove(&mut self, tag: Tag) -> Option<AttrValue> {
        self.elements.remove(&tag)
    }

    /// 第一个非空字符串值
    pub fn get_string(&self, tag: Tag) -> Option<&str> {
        match self.elements.get(&tag) {
            Some(AttrValue::Strings(values)) => values
                .first()
                .map(String::as_str)
                .filter(|v| !v.is_empty()),
            _ => None,
        }
    }

    pub fn get_strings(&self, tag: Tag) -> &[String] {
        match self.elements.get(&tag) {
            Some(AttrValue::Strings(values)) => values,
            _ => &[],
        }
    }

    pub fn set_string(&mut self, tag: Tag, value: impl Into<String>) {
        self.insert(tag, AttrValue::Strings(vec![value.into()]));
    }

    pub fn set_strings(&mut self, tag: Tag, values: Vec<String>) {
        self.insert(tag, AttrValue::Strings(values));
    }

    pub fn get_sequence(&self, tag: Tag) -> Option<&[Attributes]> {
        match self.elements.get(&tag) {
            Some(AttrValue::Sequence(items)) => Some(items),
            _ => None,
        }
    }

    pub fn set_sequence(&mut self, tag: Tag, items: Vec<Attributes>) {
        self.insert(tag, AttrValue::Sequence(items));
    }

    /// 序列的第一个条目
    pub fn get_nested(&self, tag: Tag) -> Option<&Attributes> {
        self.get_sequence(tag).and_then(|items| items.first())
    }

    /// 仅复制选中的标签
    pub fn select(&self, selection: &[Tag]) -> Attributes {
        let elements = selection
            .iter()
            .filter_map(|tag| self.elements.get(tag).map(|v| (*tag, v.clone())))
            .collect();
        Attributes { elements }
    }

    /// 按更新策略用 `other` 中选中的非空属性更新自身
    ///
    /// SUPPLEMENT 只填充之前不存在（或为空）的标签，
    /// MERGE 还会覆盖取值不同的已有标签。
    pub fn update_selected(
        &mut self,
        policy: UpdatePolicy,
        other: &Attributes,
        selection: &[Tag],
    ) -> UpdateInfo {
        let mut info = UpdateInfo::default();
        for tag in selection {
            let incoming = match other.elements.get(tag) {
                Some(value) if !value.is_empty() => value,
                _ => continue,
            };
            match self.elements.get(tag) {
                Some(existing) if !existing.is_empty() => {
                    if policy == UpdatePolicy::Merge && existing != incoming {
                        self.elements.insert(*tag, incoming.clone());
                        info.modified.push(*tag);
                    }
                }
                _ => {
                    self.elements.insert(*tag, incoming.clone());
                    info.supplemented.push(*tag);
                }
            }
        }
        info
    }
}

impl Serialize for Attributes {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let map: BTreeMap<String, &AttrValue> = self
            .elements
            .iter()
            .map(|(tag, value)| (tag_key(*tag), value))
            .collect();
        map.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Attributes {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let map = BTreeMap::<String, AttrValue>::deserialize(deserializer)?;
        let mut elements = BTreeMap::new();
        for (key, value) in map {
            let tag = parse_tag_key(&key)
                .ok_or_else(|| D::Error::custom(format!("invalid tag key: {}", key)))?;
            elements.insert(tag, value);
        }
        Ok(Attributes { elements })
    }
}

/// 标签列表按 "GGGGEEEE" 字符串序列化，便于在配置文件中书写
pub mod tag_list_serde {
    use super::{parse_tag_key, tag_key};
    use dicom::core::Tag;
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(tags: &[Tag], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(tags.iter().map(|t| tag_key(*t)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<Tag>, D::Error> {
        let keys = Vec::<String>::deserialize(deserializer)?;
        keys.iter()
            .map(|k| {
                parse_tag_key(k).ok_or_else(|| D::Error::custom(format!("invalid tag: {}", k)))
            })
            .collect()
    }
}

/// 实体级属性过滤器：选择存储的标签及其更新策略
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeFilter {
    #[serde(with = "tag_list_serde")]
    pub selection: Vec<Tag>,
    /// 为空表示已有实体的属性不更新
    #[serde(default)]
    pub update_policy: Option<UpdatePolicy>,
}

impl AttributeFilter {
    pub fn new(selection: &[Tag], update_policy: Option<UpdatePolicy>) -> Self {
        Self {
            selection: selection.to_vec(),
            update_policy,
        }
    }

    pub fn patient() -> Self {
        Self::new(PATIENT_ATTRS, Some(UpdatePolicy::Supplement))
    }

    pub fn study() -> Self {
        Self::new(STUDY_ATTRS, Some(UpdatePolicy::Merge))
    }

    pub fn series() -> Self {
        Self::new(SERIES_ATTRS, Some(UpdatePolicy::Merge))
    }

    pub fn instance() -> Self {
        Self::new(INSTANCE_ATTRS, None)
    }
}

pub const PATIENT_ATTRS: &[Tag] = &[
    tags::SPECIFIC_CHARACTER_SET,
    tags::PATIENT_NAME,
    tags::PATIENT_ID,
    tags::ISSUER_OF_PATIENT_ID,
    tags::ISSUER_OF_PATIENT_ID_QUALIFIERS_SEQUENCE,
    tags::PATIENT_BIRTH_DATE,
    tags::PATIENT_BIRTH_TIME,
    tags::PATIENT_SEX,
    tags::OTHER_PATIENT_NAMES,
    tags::OTHER_PATIENT_I_DS_SEQUENCE,
    tags::PATIENT_BIRTH_NAME,
    tags::PATIENT_ADDRESS,
    tags::PATIENT_MOTHER_BIRTH_NAME,
    tags::MEDICAL_ALERTS,
    tags::ALLERGIES,
    tags::ETHNIC_GROUP,
    tags::PATIENT_COMMENTS,
];

pub const STUDY_ATTRS: &[Tag] = &[
    tags::SPECIFIC_CHARACTER_SET,
    tags::STUDY_DATE,
    tags::STUDY_TIME,
    tags::ACCESSION_NUMBER,
    tags::ISSUER_OF_ACCESSION_NUMBER_SEQUENCE,
    tags::REFERRING_PHYSICIAN_NAME,
    tags::STUDY_DESCRIPTION,
    tags::PROCEDURE_CODE_SEQUENCE,
    tags::PATIENT_AGE,
    tags::PATIENT_SIZE,
    tags::PATIENT_WEIGHT,
    tags::STUDY_INSTANCE_UID,
    tags::STUDY_ID,
];

pub const SERIES_ATTRS: &[Tag] = &[
    tags::SPECIFIC_CHARACTER_SET,
    tags::MODALITY,
    tags::MANUFACTURER,
    tags::INSTITUTION_NAME,
    tags::INSTITUTION_CODE_SEQUENCE,
    tags::STATION_NAME,
    tags::SERIES_DESCRIPTION,
    tags::INSTITUTIONAL_DEPARTMENT_NAME,
    tags::PERFORMING_PHYSICIAN_NAME,
    tags::MANUFACTURER_MODEL_NAME,
    tags::BODY_PART_EXAMINED,
    tags::SERIES_INSTANCE_UID,
    tags::SERIES_NUMBER,
    tags::LATERALITY,
    tags::PERFORMED_PROCEDURE_STEP_START_DATE,
    tags::PERFORMED_PROCEDURE_STEP_START_TIME,
    tags::REQUEST_ATTRIBUTES_SEQUENCE,
];

pub const INSTANCE_ATTRS: &[Tag] = &[
    tags::SPECIFIC_CHARACTER_SET,
    tags::IMAGE_TYPE,
    tags::SOP_CLASS_UID,
    tags::SOP_INSTANCE_UID,
    tags::CONTENT_DATE,
    tags::CONTENT_TIME,
    tags::INSTANCE_NUMBER,
    tags::NUMBER_OF_FRAMES,
    tags::ROWS,
    tags::COLUMNS,
    tags::BITS_ALLOCATED,
    tags::CONCEPT_NAME_CODE_SEQUENCE,
    tags::VERIFYING_OBSERVER_SEQUENCE,
    tags::COMPLETION_FLAG,
    tags::VERIFICATION_FLAG,
    tags::DOCUMENT_TITLE,
    tags::CONTENT_LABEL,
    tags::CONTENT_DESCRIPTION,
    tags::CURRENT_REQUESTED_PROCEDURE_EVIDENCE_SEQUENCE,
];
