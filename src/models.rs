use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use uuid::Uuid;

/// Declares a closed set of values stored as TEXT and exchanged as JSON strings.
macro_rules! text_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(#[serde(rename = $text)] $variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }

            pub fn parse(raw: &str) -> Option<Self> {
                match raw {
                    $($text => Some($name::$variant),)+
                    _ => None,
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl sqlx::Type<sqlx::Postgres> for $name {
            fn type_info() -> sqlx::postgres::PgTypeInfo {
                <String as sqlx::Type<sqlx::Postgres>>::type_info()
            }

            fn compatible(ty: &sqlx::postgres::PgTypeInfo) -> bool {
                <String as sqlx::Type<sqlx::Postgres>>::compatible(ty)
            }
        }

        impl<'r> sqlx::Decode<'r, sqlx::Postgres> for $name {
            fn decode(
                value: sqlx::postgres::PgValueRef<'r>,
            ) -> Result<Self, sqlx::error::BoxDynError> {
                let raw = <&str as sqlx::Decode<sqlx::Postgres>>::decode(value)?;
                Self::parse(raw)
                    .ok_or_else(|| format!("unknown {} value: {}", stringify!($name), raw).into())
            }
        }

        impl<'q> sqlx::Encode<'q, sqlx::Postgres> for $name {
            fn encode_by_ref(
                &self,
                buf: &mut sqlx::postgres::PgArgumentBuffer,
            ) -> Result<sqlx::encode::IsNull, sqlx::error::BoxDynError> {
                <&str as sqlx::Encode<sqlx::Postgres>>::encode_by_ref(&self.as_str(), buf)
            }
        }
    };
}

text_enum! {
    /// Submitter language. Resolution never fails; unknown values become `Ro`.
    Locale { Ro => "ro", En => "en" }
}

impl Default for Locale {
    fn default() -> Self {
        Locale::Ro
    }
}

text_enum! {
    /// Commercial readiness, fixed at intake.
    IntentLevel { High => "high", Medium => "medium", Low => "low" }
}

text_enum! {
    /// Operator-facing priority.
    LeadTier { A => "A", B => "B", C => "C", D => "D" }
}

text_enum! {
    /// Canonical lead lifecycle.
    LeadStatus {
        New => "NEW",
        CalledNoAnswer => "CALLED_NO_ANSWER",
        VerifiedReady => "VERIFIED_READY",
        Assigned => "ASSIGNED",
        LowIntentNurture => "LOW_INTENT_NURTURE",
        Invalid => "INVALID",
        SentToClinic => "SENT_TO_CLINIC",
    }
}

impl LeadStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, LeadStatus::Invalid | LeadStatus::SentToClinic)
    }

    /// Statuses that imply a completed operator verification.
    pub fn is_verified_equivalent(&self) -> bool {
        matches!(
            self,
            LeadStatus::VerifiedReady | LeadStatus::Assigned | LeadStatus::SentToClinic
        )
    }

    /// Collapses the legacy `status` / `operator_status` pair into one value.
    ///
    /// `operator_status` wins when present and recognised; a legacy
    /// `rejected` always maps to `Invalid`.
    pub fn from_legacy(status: Option<&str>, operator_status: Option<&str>) -> LeadStatus {
        let canonical = status.and_then(|s| LeadStatus::parse(s.trim()));
        let status = status.map(|s| s.trim().to_ascii_lowercase());
        if status.as_deref() == Some("rejected") {
            return LeadStatus::Invalid;
        }
        let operator_status = operator_status.map(str::trim).and_then(|s| {
            if s.eq_ignore_ascii_case("INFO_ONLY") {
                Some(LeadStatus::LowIntentNurture)
            } else {
                LeadStatus::parse(s)
            }
        });
        if let Some(op) = operator_status {
            // legacy rows kept operator_status at VERIFIED_READY after assignment
            return match (op, status.as_deref()) {
                (LeadStatus::VerifiedReady, Some("assigned")) => LeadStatus::Assigned,
                (LeadStatus::VerifiedReady, Some("sent")) => LeadStatus::SentToClinic,
                (op, _) => op,
            };
        }
        match status.as_deref() {
            Some("verified") => LeadStatus::VerifiedReady,
            Some("assigned") => LeadStatus::Assigned,
            Some("sent") | Some("sent_to_clinic") => LeadStatus::SentToClinic,
            // already migrated
            _ => canonical.unwrap_or(LeadStatus::New),
        }
    }
}

text_enum! {
    UrgencyLevel {
        Asap0To30 => "ASAP_0_30",
        Soon1To3 => "SOON_1_3",
        Mid3To6 => "MID_3_6",
        Later6To12 => "LATER_6_12",
        InfoOnly => "INFO_ONLY",
    }
}

impl UrgencyLevel {
    /// ASAP, soon or mid-term.
    pub fn is_good(&self) -> bool {
        matches!(
            self,
            UrgencyLevel::Asap0To30 | UrgencyLevel::Soon1To3 | UrgencyLevel::Mid3To6
        )
    }

    /// Legacy timeline bucket stored alongside the urgency.
    pub fn legacy_timeline(&self) -> Timeline {
        match self {
            UrgencyLevel::Asap0To30 => Timeline::Asap,
            UrgencyLevel::Soon1To3 | UrgencyLevel::Mid3To6 => Timeline::OneToThreeMonths,
            UrgencyLevel::Later6To12 | UrgencyLevel::InfoOnly => Timeline::Researching,
        }
    }
}

text_enum! {
    BudgetRange {
        Under10k => "under-10k",
        From10kTo20k => "10k-20k",
        Over20k => "over-20k",
        PreferDiscuss => "prefer-discuss",
    }
}

impl BudgetRange {
    /// A concrete financing bucket, as opposed to "prefer to discuss".
    pub fn is_known(&self) -> bool {
        !matches!(self, BudgetRange::PreferDiscuss)
    }
}

text_enum! {
    /// Legacy desired-timeline bucket.
    Timeline {
        Asap => "asap",
        OneToThreeMonths => "1-3months",
        Researching => "researching",
    }
}

text_enum! {
    VoucherStatus {
        NoVoucher => "NONE",
        Applied => "APPLIED",
        ApprovedAssmb => "APPROVED_ASSMB",
        ApprovedNational => "APPROVED_NATIONAL",
        ApprovedOther => "APPROVED_OTHER",
    }
}

impl VoucherStatus {
    pub fn is_approved(&self) -> bool {
        matches!(
            self,
            VoucherStatus::ApprovedAssmb
                | VoucherStatus::ApprovedNational
                | VoucherStatus::ApprovedOther
        )
    }
}

text_enum! {
    PrimaryFactor {
        Unknown => "UNKNOWN",
        MaleFactor => "MALE_FACTOR",
        FemaleFactor => "FEMALE_FACTOR",
        Both => "BOTH",
        Unexplained => "UNEXPLAINED",
        Endometriosis => "ENDOMETRIOSIS",
        LowOvarianReserve => "LOW_OVARIAN_RESERVE",
        Tubal => "TUBAL",
        Pcos => "PCOS",
        Other => "OTHER",
    }
}

text_enum! {
    ContactMethod { Phone => "PHONE", WhatsApp => "WHATSAPP", Email => "EMAIL" }
}

text_enum! {
    TriedIvf { Yes => "Yes", No => "No", InProgress => "InProgress" }
}

text_enum! {
    /// Coarse female-age bucket.
    AgeRange {
        Under30 => "under-30",
        From30To34 => "30-34",
        From35To37 => "35-37",
        From38To40 => "38-40",
        Over41 => "41+",
    }
}

impl AgeRange {
    pub fn from_age(age: i32) -> AgeRange {
        match age {
            a if a < 30 => AgeRange::Under30,
            30..=34 => AgeRange::From30To34,
            35..=37 => AgeRange::From35To37,
            38..=40 => AgeRange::From38To40,
            _ => AgeRange::Over41,
        }
    }
}

text_enum! {
    TestStatus {
        Ready => "ready",
        Pending => "pending",
        NotStarted => "not-started",
        Unknown => "unknown",
    }
}

text_enum! {
    EventType {
        Created => "CREATED",
        ConsentCaptured => "CONSENT_CAPTURED",
        OperatorCalled => "OPERATOR_CALLED",
        StatusChanged => "STATUS_CHANGED",
        Assigned => "ASSIGNED",
        SentEmail => "SENT_EMAIL",
    }
}

// ============ Database Models ============

/// A prospective patient's submitted contact and qualification record.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct Lead {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub locale: Locale,

    pub first_name: String,
    pub last_name: String,
    /// Phone as submitted, separators stripped.
    pub phone: String,
    pub phone_e164: Option<String>,
    pub email: String,
    pub city: String,

    pub age_range: AgeRange,
    pub female_age_exact: Option<i32>,
    pub male_age_exact: Option<i32>,
    pub tried_ivf: TriedIvf,
    pub urgency_level: Option<UrgencyLevel>,
    pub timeline: Timeline,
    pub budget_range: BudgetRange,
    pub voucher_status: Option<VoucherStatus>,
    pub primary_factor: Option<PrimaryFactor>,
    pub has_recent_tests: Option<bool>,
    pub tests_list: Option<String>,
    pub test_status: Option<TestStatus>,
    pub prior_clinics: Option<String>,
    pub availability: Option<String>,
    pub best_contact_method: Option<ContactMethod>,
    pub message: Option<String>,

    pub gdpr_consent: bool,
    pub consent_to_share: bool,
    pub consent_captured_at: Option<DateTime<Utc>>,
    /// Salted hash of the submitting IP. The raw address is never stored.
    pub ip_hash: Option<String>,
    pub user_agent: Option<String>,

    pub intent_level: IntentLevel,
    pub tier: LeadTier,
    pub tier_reason: String,

    pub status: LeadStatus,
    pub call_attempts: i32,
    pub last_call_at: Option<DateTime<Utc>>,
    pub operator_notes: Option<String>,
    pub assigned_clinic_id: Option<Uuid>,
    pub verified_at: Option<DateTime<Utc>>,
    pub assigned_at: Option<DateTime<Utc>>,
    pub sent_to_clinic_at: Option<DateTime<Utc>>,

    /// 0 = not enrolled, 1..=3 = next email to send.
    pub nurture_stage: i32,
    pub nurture_next_at: Option<DateTime<Utc>>,
    pub nurture_completed: bool,
}

impl Lead {
    /// Short display id: first 8 hex digits of the id, uppercase.
    pub fn short_id(&self) -> String {
        short_id(&self.id)
    }

    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }

    /// Nurture sequence enrolled and not yet finished.
    pub fn nurture_active(&self) -> bool {
        self.nurture_stage > 0 && !self.nurture_completed
    }
}

pub fn short_id(id: &Uuid) -> String {
    id.simple().to_string()[..8].to_uppercase()
}

/// A partner clinic. Only active clinics are assignment targets.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct Clinic {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub cities: Vec<String>,
    pub active: bool,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One entry of a lead's append-only audit trail.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct LeadEvent {
    pub id: Uuid,
    pub lead_id: Uuid,
    pub event_type: EventType,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl LeadEvent {
    pub fn new(
        lead_id: Uuid,
        event_type: EventType,
        payload: serde_json::Value,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            lead_id,
            event_type,
            payload,
            created_at: at,
        }
    }
}

// ============ API Request/Response Models ============

/// Request payload for creating a clinic.
#[derive(Debug, Clone, Deserialize)]
pub struct NewClinic {
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    #[serde(default)]
    pub cities: Vec<String>,
    #[serde(default = "default_active")]
    pub active: bool,
    pub notes: Option<String>,
}

fn default_active() -> bool {
    true
}

/// Partial clinic update. Absent fields are left untouched.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClinicUpdate {
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub cities: Option<Vec<String>>,
    pub active: Option<bool>,
    pub notes: Option<String>,
}

impl ClinicUpdate {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.email.is_none()
            && self.phone.is_none()
            && self.cities.is_none()
            && self.active.is_none()
            && self.notes.is_none()
    }

    pub fn apply(&self, clinic: &mut Clinic) {
        if let Some(name) = &self.name {
            clinic.name = name.trim().to_string();
        }
        if let Some(email) = &self.email {
            clinic.email = email.trim().to_lowercase();
        }
        if let Some(phone) = &self.phone {
            clinic.phone = Some(phone.trim().to_string()).filter(|p| !p.is_empty());
        }
        if let Some(cities) = &self.cities {
            clinic.cities = clean_cities(cities);
        }
        if let Some(active) = self.active {
            clinic.active = active;
        }
        if let Some(notes) = &self.notes {
            clinic.notes = Some(notes.trim().to_string()).filter(|n| !n.is_empty());
        }
    }
}

/// Trims city names and drops blanks.
pub fn clean_cities(cities: &[String]) -> Vec<String> {
    cities
        .iter()
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .collect()
}

/// Admin list filter with pagination.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LeadFilter {
    pub status: Option<LeadStatus>,
    pub tier: Option<LeadTier>,
    pub intent: Option<IntentLevel>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl LeadFilter {
    pub const MAX_LIMIT: i64 = 100;

    pub fn limit(&self) -> i64 {
        self.limit.unwrap_or(50).clamp(1, Self::MAX_LIMIT)
    }

    pub fn offset(&self) -> i64 {
        self.offset.unwrap_or(0).max(0)
    }

    pub fn matches(&self, lead: &Lead) -> bool {
        self.status.map_or(true, |s| lead.status == s)
            && self.tier.map_or(true, |t| lead.tier == t)
            && self.intent.map_or(true, |i| lead.intent_level == i)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_id_is_uppercase_prefix() {
        let id = Uuid::parse_str("3f2a9c1e-0000-4000-8000-000000000000").unwrap();
        assert_eq!(short_id(&id), "3F2A9C1E");
    }

    #[test]
    fn age_range_buckets() {
        assert_eq!(AgeRange::from_age(18), AgeRange::Under30);
        assert_eq!(AgeRange::from_age(34), AgeRange::From30To34);
        assert_eq!(AgeRange::from_age(37), AgeRange::From35To37);
        assert_eq!(AgeRange::from_age(40), AgeRange::From38To40);
        assert_eq!(AgeRange::from_age(41), AgeRange::Over41);
    }

    #[test]
    fn legacy_status_collapses() {
        assert_eq!(LeadStatus::from_legacy(Some("rejected"), Some("NEW")), LeadStatus::Invalid);
        assert_eq!(
            LeadStatus::from_legacy(Some("assigned"), Some("VERIFIED_READY")),
            LeadStatus::Assigned
        );
        assert_eq!(
            LeadStatus::from_legacy(Some("new_unverified"), Some("LOW_INTENT_NURTURE")),
            LeadStatus::LowIntentNurture
        );
        assert_eq!(LeadStatus::from_legacy(Some("verified"), None), LeadStatus::VerifiedReady);
        assert_eq!(LeadStatus::from_legacy(Some("sent"), None), LeadStatus::SentToClinic);
        assert_eq!(LeadStatus::from_legacy(None, None), LeadStatus::New);
        assert_eq!(
            LeadStatus::from_legacy(Some("new_unverified"), Some("INFO_ONLY")),
            LeadStatus::LowIntentNurture
        );
        assert_eq!(
            LeadStatus::from_legacy(Some("new_unverified"), Some(" info_only ")),
            LeadStatus::LowIntentNurture
        );
        assert_eq!(
            LeadStatus::from_legacy(Some("CALLED_NO_ANSWER"), None),
            LeadStatus::CalledNoAnswer
        );
    }

    #[test]
    fn text_enums_parse_their_own_text() {
        for status in LeadStatus::ALL {
            assert_eq!(LeadStatus::parse(status.as_str()), Some(*status));
        }
        assert_eq!(UrgencyLevel::parse("asap"), None);
        assert_eq!(
            serde_json::to_string(&BudgetRange::From10kTo20k).unwrap(),
            "\"10k-20k\""
        );
    }
}
