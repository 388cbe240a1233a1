use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::verdict::ModerationStatus;
use crate::models::verification::{
    ReviewCategory, RuleSnapshot, UserVerificationState, VerificationStatus,
};

/// Bio length that counts as "some information" for the lenient policy.
const MIN_INFORMATIVE_BIO: usize = 20;

/// Bio length that, together with an approved photo, earns the top score.
const RICH_BIO: usize = 50;

pub const REASON_PHOTO_POLICY: &str = "Photo policy issues";
pub const REASON_RULES: &str = "Rules";
pub const REASON_PHOTO_TEXT_POLICY: &str = "Photo/text policy issues";
pub const REASON_MINIMAL_INFO: &str = "Minimal profile information present";
pub const REASON_SPARSE: &str = "Very sparse profile";

/// Everything a decision depends on. Built by the worker or the sweep from
/// current store state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecisionInput {
    pub rules: Option<RuleSnapshot>,
    pub photo_statuses: Vec<ModerationStatus>,
    pub text_status: Option<ModerationStatus>,
    pub bio_length: usize,
    pub has_profession: bool,
}

impl DecisionInput {
    pub fn has_rejected_photo(&self) -> bool {
        self.photo_statuses.contains(&ModerationStatus::Rejected)
    }

    pub fn has_approved_photo(&self) -> bool {
        self.photo_statuses.contains(&ModerationStatus::Approved)
    }

    pub fn has_any_photo(&self) -> bool {
        !self.photo_statuses.is_empty()
    }

    pub fn text_rejected(&self) -> bool {
        self.text_status == Some(ModerationStatus::Rejected)
    }
}

/// Final classification of a profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub category: ReviewCategory,
    pub verification_status: VerificationStatus,
    pub is_verified: bool,
    pub reason: String,
    pub profile_score: Option<i32>,
    pub has_rejected_photo: bool,
}

impl Decision {
    /// State row to persist for this decision. Notification bookkeeping is
    /// carried over from `previous`.
    pub fn to_state(
        &self,
        user_id: Uuid,
        previous: Option<&UserVerificationState>,
        reviewed_at: DateTime<Utc>,
    ) -> UserVerificationState {
        UserVerificationState {
            user_id,
            verification_status: self.verification_status,
            is_verified: self.is_verified,
            review_category: self.category,
            review_reason: self.reason.clone(),
            review_notified: previous.is_some_and(|p| p.review_notified),
            notified_template: previous.and_then(|p| p.notified_template),
            last_reviewed_at: reviewed_at,
            profile_score: self.profile_score,
        }
    }
}

/// The two ways a profile can be classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionPolicy {
    /// Queue-driven review. Any rejected photo forces `red_flags`; otherwise
    /// the upstream rule suggestion stands.
    Strict,
    /// Backlog sweep. Verifies profiles with minimal information but never
    /// relaxes a profile with a rejected photo or bio.
    Lenient,
}

impl DecisionPolicy {
    pub fn decide(self, input: &DecisionInput) -> Decision {
        match self {
            DecisionPolicy::Strict => strict_decision(input),
            DecisionPolicy::Lenient => lenient_decision(input),
        }
    }
}

fn strict_decision(input: &DecisionInput) -> Decision {
    let has_rejected_photo = input.has_rejected_photo();

    let (category, reason) = if has_rejected_photo {
        (ReviewCategory::RedFlags, REASON_PHOTO_POLICY)
    } else {
        let suggested = input
            .rules
            .as_ref()
            .and_then(|rules| rules.category_suggested)
            .unwrap_or(ReviewCategory::NeedsMoreDetails);
        (suggested, REASON_RULES)
    };

    let (verification_status, is_verified) = match category {
        ReviewCategory::Exceptional | ReviewCategory::Eligible => {
            (VerificationStatus::Verified, true)
        }
        ReviewCategory::RedFlags => (VerificationStatus::Rejected, false),
        ReviewCategory::NeedsMoreDetails => (VerificationStatus::Pending, false),
    };

    Decision {
        category,
        verification_status,
        is_verified,
        reason: reason.to_string(),
        profile_score: None,
        has_rejected_photo,
    }
}

fn lenient_decision(input: &DecisionInput) -> Decision {
    let has_rejected_photo = input.has_rejected_photo();
    let has_approved_photo = input.has_approved_photo();

    if has_rejected_photo || input.text_rejected() {
        return Decision {
            category: ReviewCategory::RedFlags,
            verification_status: VerificationStatus::Pending,
            is_verified: false,
            reason: REASON_PHOTO_TEXT_POLICY.to_string(),
            profile_score: None,
            has_rejected_photo,
        };
    }

    // No rejected photo at this point, so any photo counts.
    let minimal_info = has_approved_photo
        || input.has_any_photo()
        || input.bio_length >= MIN_INFORMATIVE_BIO
        || input.has_profession;

    if !minimal_info {
        return Decision {
            category: ReviewCategory::NeedsMoreDetails,
            verification_status: VerificationStatus::Pending,
            is_verified: false,
            reason: REASON_SPARSE.to_string(),
            profile_score: None,
            has_rejected_photo,
        };
    }

    let score = if has_approved_photo && input.bio_length >= RICH_BIO {
        8
    } else if has_approved_photo || input.bio_length >= MIN_INFORMATIVE_BIO {
        7
    } else {
        6
    };

    Decision {
        category: ReviewCategory::Eligible,
        verification_status: VerificationStatus::Verified,
        is_verified: true,
        reason: REASON_MINIMAL_INFO.to_string(),
        profile_score: Some(score),
        has_rejected_photo,
    }
}
