//! 重复对象判定
//!
//! 找到同标识的旧实例后，根据拒绝状态、覆盖策略和摘要决定如何处理新对象。
//! 判定不访问存储，只依赖调用方查询到的快照。

use crate::conf::StoreConfig;
use pacs_core::{AcceptPreviousRejectedInstance, Code, ConflictKind, OverwritePolicy};
use pacs_database::{Instance, Location};
use pacs_dicom::KEY_OBJECT_SELECTION_DOCUMENT_STORAGE;
use std::fmt;

/// 丢弃新对象的原因
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    /// 旧实例已被拒绝，拒绝说明配置为忽略
    PreviousRejected(Code),
    /// 覆盖策略为 NEVER
    NeverOverwrite,
    /// 与旧实例来源不同
    DifferentSource,
    /// 与已有存储位置摘要相同
    EqualDigest,
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DropReason::PreviousRejected(code) => write!(f, "旧实例已被拒绝 {}", code),
            DropReason::NeverOverwrite => f.write_str("不覆盖已接收的实例"),
            DropReason::DifferentSource => f.write_str("来源不同"),
            DropReason::EqualDigest => f.write_str("摘要相同"),
        }
    }
}

/// 判定结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Drop(DropReason),
    /// 摘要相同且旧实例已被拒绝：撤销拒绝，不创建新内容
    RevokeRejection(Code),
    /// 删除旧实例后按新对象入库
    Replace,
    Conflict(ConflictKind, String),
}

/// 判定输入
#[derive(Debug, Clone, Copy)]
pub struct DecisionInput<'a> {
    pub overwrite_policy: OverwritePolicy,
    pub calling_aet: Option<&'a str>,
    pub sop_class_uid: &'a str,
    pub digest: Option<&'a str>,
    pub previous: &'a Instance,
    pub previous_locations: &'a [Location],
    /// 旧实例所在系列记录的来源AE
    pub previous_source_aet: Option<&'a str>,
}

fn is_same_source(input: &DecisionInput<'_>) -> bool {
    match (input.calling_aet, input.previous_source_aet) {
        (Some(calling), Some(previous)) => calling == previous,
        _ => false,
    }
}

fn contains_equal_digest(locations: &[Location], digest: Option<&str>) -> bool {
    let digest = match digest {
        Some(d) => d,
        None => return false,
    };
    locations.iter().any(|location| {
        location
            .digest
            .as_deref()
            .map_or(false, |d| d.eq_ignore_ascii_case(digest))
    })
}

/// 判定同标识新对象的处理方式
pub fn decide(input: &DecisionInput<'_>, config: &StoreConfig) -> Decision {
    let previous = input.previous;

    if previous.sop_class_uid == KEY_OBJECT_SELECTION_DOCUMENT_STORAGE {
        if let Some(code) = &previous.concept_name_code {
            if config.rejection_note(code).is_some() {
                return Decision::Conflict(
                    ConflictKind::DuplicateRejectionNote,
                    format!("拒绝说明 [uid={}] 已接收", previous.sop_instance_uid),
                );
            }
        }
    }

    let rejection = previous
        .rejection_note_code
        .as_ref()
        .and_then(|code| config.rejection_note(code));

    match rejection {
        Some(note) => match note.accept_previous_rejected_instance {
            AcceptPreviousRejectedInstance::Ignore => {
                return Decision::Drop(DropReason::PreviousRejected(note.code.clone()));
            }
            AcceptPreviousRejectedInstance::Reject => {
                return Decision::Conflict(
                    ConflictKind::SubsequentRejectedOccurrence,
                    format!(
                        "已拒绝对象再次出现 [uid={}, rejection={}]",
                        previous.sop_instance_uid, note.code
                    ),
                );
            }
            AcceptPreviousRejectedInstance::Restore => {}
        },
        None => match input.overwrite_policy {
            OverwritePolicy::Never => return Decision::Drop(DropReason::NeverOverwrite),
            OverwritePolicy::SameSource | OverwritePolicy::SameSourceAndSeries => {
                if !is_same_source(input) {
                    return Decision::Drop(DropReason::DifferentSource);
                }
            }
            OverwritePolicy::Always => {}
        },
    }

    if contains_equal_digest(input.previous_locations, input.digest) {
        return match rejection {
            Some(note) => Decision::RevokeRejection(note.code.clone()),
            None => Decision::Drop(DropReason::EqualDigest),
        };
    }

    if previous.sop_class_uid != input.sop_class_uid {
        return Decision::Conflict(
            ConflictKind::ClassInstanceConflict,
            format!(
                "实例 [uid={}] 的SOP类 {} 与已存储的 {} 不一致",
                previous.sop_instance_uid, input.sop_class_uid, previous.sop_class_uid
            ),
        );
    }

    Decision::Replace
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conf::{
        incorrect_modality_worklist_entry, data_retention_policy_expired,
        rejected_for_quality_reasons, revoke_rejection,
    };
    use crate::test_support::{write_result, CT_IMAGE_STORAGE};
    use pacs_dicom::Attributes;
    use uuid::Uuid;

    struct Fixture {
        previous: Instance,
        locations: Vec<Location>,
        source: Option<&'static str>,
    }

    impl Fixture {
        fn new() -> Self {
            let previous = Instance::new(Uuid::new_v4(), "1.2.3.4", CT_IMAGE_STORAGE, Attributes::new());
            let locations = vec![Location::new(previous.id, &write_result("aaaa"))];
            Self {
                previous,
                locations,
                source: Some("MODALITY"),
            }
        }

        fn rejected(mut self, code: Code) -> Self {
            self.previous.rejection_note_code = Some(code);
            self
        }

        fn decide(&self, policy: OverwritePolicy, calling: Option<&str>, digest: &str) -> Decision {
            let input = DecisionInput {
                overwrite_policy: policy,
                calling_aet: calling,
                sop_class_uid: CT_IMAGE_STORAGE,
                digest: Some(digest),
                previous: &self.previous,
                previous_locations: &self.locations,
                previous_source_aet: self.source,
            };
            decide(&input, &StoreConfig::default())
        }
    }

    #[test]
    fn test_overwrite_policy_table() {
        let f = Fixture::new();
        let cases = [
            (OverwritePolicy::Never, Some("MODALITY"), "bbbb", Decision::Drop(DropReason::NeverOverwrite)),
            (OverwritePolicy::Never, Some("MODALITY"), "aaaa", Decision::Drop(DropReason::NeverOverwrite)),
            (OverwritePolicy::SameSource, Some("OTHER"), "bbbb", Decision::Drop(DropReason::DifferentSource)),
            (OverwritePolicy::SameSource, None, "bbbb", Decision::Drop(DropReason::DifferentSource)),
            (OverwritePolicy::SameSource, Some("MODALITY"), "bbbb", Decision::Replace),
            (OverwritePolicy::SameSourceAndSeries, Some("MODALITY"), "AAAA", Decision::Drop(DropReason::EqualDigest)),
            (OverwritePolicy::Always, Some("OTHER"), "aaaa", Decision::Drop(DropReason::EqualDigest)),
            (OverwritePolicy::Always, Some("OTHER"), "bbbb", Decision::Replace),
        ];
        for (policy, calling, digest, expected) in cases {
            assert_eq!(f.decide(policy, calling, digest), expected, "{:?} {:?} {}", policy, calling, digest);
        }
    }

    #[test]
    fn test_previously_rejected() {
        let ignored = Fixture::new().rejected(rejected_for_quality_reasons());
        assert_eq!(
            ignored.decide(OverwritePolicy::Always, Some("MODALITY"), "bbbb"),
            Decision::Drop(DropReason::PreviousRejected(rejected_for_quality_reasons()))
        );

        let rejecting = Fixture::new().rejected(incorrect_modality_worklist_entry());
        assert!(matches!(
            rejecting.decide(OverwritePolicy::Always, Some("MODALITY"), "bbbb"),
            Decision::Conflict(ConflictKind::SubsequentRejectedOccurrence, _)
        ));

        // RESTORE 不受覆盖策略约束
        let restoring = Fixture::new().rejected(data_retention_policy_expired());
        assert_eq!(
            restoring.decide(OverwritePolicy::Never, Some("OTHER"), "aaaa"),
            Decision::RevokeRejection(data_retention_policy_expired())
        );
        assert_eq!(
            restoring.decide(OverwritePolicy::Never, Some("OTHER"), "bbbb"),
            Decision::Replace
        );
    }

    #[test]
    fn test_unconfigured_rejection_code_is_ignored() {
        let f = Fixture::new().rejected(Code::new("X", "99LOCAL", None, "Unknown"));
        assert_eq!(
            f.decide(OverwritePolicy::Never, Some("MODALITY"), "bbbb"),
            Decision::Drop(DropReason::NeverOverwrite)
        );
    }

    #[test]
    fn test_duplicate_rejection_note() {
        let mut f = Fixture::new();
        f.previous.sop_class_uid = KEY_OBJECT_SELECTION_DOCUMENT_STORAGE.to_string();
        f.previous.concept_name_code = Some(revoke_rejection());
        assert!(matches!(
            f.decide(OverwritePolicy::Always, Some("MODALITY"), "aaaa"),
            Decision::Conflict(ConflictKind::DuplicateRejectionNote, _)
        ));
    }

    #[test]
    fn test_class_instance_conflict_on_replace() {
        let f = Fixture::new();
        let input = DecisionInput {
            overwrite_policy: OverwritePolicy::Always,
            calling_aet: Some("MODALITY"),
            sop_class_uid: "1.2.840.10008.5.1.4.1.1.4",
            digest: Some("bbbb"),
            previous: &f.previous,
            previous_locations: &f.locations,
            previous_source_aet: f.source,
        };
        assert!(matches!(
            decide(&input, &StoreConfig::default()),
            Decision::Conflict(ConflictKind::ClassInstanceConflict, _)
        ));
    }

    #[test]
    fn test_missing_digest_never_equal() {
        let f = Fixture::new();
        let input = DecisionInput {
            overwrite_policy: OverwritePolicy::Always,
            calling_aet: None,
            sop_class_uid: CT_IMAGE_STORAGE,
            digest: None,
            previous: &f.previous,
            previous_locations: &f.locations,
            previous_source_aet: None,
        };
        assert_eq!(decide(&input, &StoreConfig::default()), Decision::Replace);
    }
}
