//! Meeting presence: matching rules plus the evidence-fusion detector.

pub mod detector;
pub mod rules;

pub use detector::{PresenceDetector, PresenceEvidence, PresenceState, Subscription};
pub use rules::MeetingRules;
