use std::fmt;

pub type MessageId = i32;

/// LDAP result code (RFC 4511 Appendix A).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResultCode(pub u32);

impl ResultCode {
    pub const SUCCESS: ResultCode = ResultCode(0);
    pub const OPERATIONS_ERROR: ResultCode = ResultCode(1);
    pub const PROTOCOL_ERROR: ResultCode = ResultCode(2);
    pub const TIME_LIMIT_EXCEEDED: ResultCode = ResultCode(3);
    pub const SIZE_LIMIT_EXCEEDED: ResultCode = ResultCode(4);
    pub const COMPARE_FALSE: ResultCode = ResultCode(5);
    pub const COMPARE_TRUE: ResultCode = ResultCode(6);
    pub const REFERRAL: ResultCode = ResultCode(10);
    pub const SASL_BIND_IN_PROGRESS: ResultCode = ResultCode(14);
    pub const NO_SUCH_OBJECT: ResultCode = ResultCode(32);
    pub const INVALID_CREDENTIALS: ResultCode = ResultCode(49);
    pub const UNAVAILABLE: ResultCode = ResultCode(52);
    pub const UNWILLING_TO_PERFORM: ResultCode = ResultCode(53);
    pub const OTHER: ResultCode = ResultCode(80);

    pub fn name(self) -> &'static str {
        match self.0 {
            0 => "success",
            1 => "operationsError",
            2 => "protocolError",
            3 => "timeLimitExceeded",
            4 => "sizeLimitExceeded",
            5 => "compareFalse",
            6 => "compareTrue",
            7 => "authMethodNotSupported",
            8 => "strongerAuthRequired",
            10 => "referral",
            11 => "adminLimitExceeded",
            12 => "unavailableCriticalExtension",
            13 => "confidentialityRequired",
            14 => "saslBindInProgress",
            16 => "noSuchAttribute",
            17 => "undefinedAttributeType",
            18 => "inappropriateMatching",
            19 => "constraintViolation",
            20 => "attributeOrValueExists",
            21 => "invalidAttributeSyntax",
            32 => "noSuchObject",
            33 => "aliasProblem",
            34 => "invalidDNSyntax",
            36 => "aliasDereferencingProblem",
            48 => "inappropriateAuthentication",
            49 => "invalidCredentials",
            50 => "insufficientAccessRights",
            51 => "busy",
            52 => "unavailable",
            53 => "unwillingToPerform",
            54 => "loopDetect",
            64 => "namingViolation",
            65 => "objectClassViolation",
            66 => "notAllowedOnNonLeaf",
            67 => "notAllowedOnRDN",
            68 => "entryAlreadyExists",
            69 => "objectClassModsProhibited",
            71 => "affectsMultipleDSAs",
            80 => "other",
            _ => "unknown",
        }
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LdapResult {
    pub code: ResultCode,
    pub matched_dn: String,
    pub diag: String,
    pub referrals: Vec<String>,
}

impl LdapResult {
    pub fn new(code: ResultCode) -> Self {
        Self {
            code,
            matched_dn: String::new(),
            diag: String::new(),
            referrals: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.code == ResultCode::SUCCESS
    }

    /// Turns a non-success result into [`LdapError::Protocol`](crate::LdapError::Protocol).
    pub fn success(self) -> crate::Result<Self> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(self.into_error())
        }
    }

    pub fn into_error(self) -> crate::LdapError {
        crate::LdapError::Protocol {
            code: self.code,
            matched_dn: self.matched_dn,
            diag: self.diag,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Control {
    pub oid: String,
    pub critical: bool,
    pub value: Option<Vec<u8>>,
}

impl Control {
    pub fn new(oid: &str, critical: bool, value: Option<Vec<u8>>) -> Self {
        Self {
            oid: oid.to_owned(),
            critical,
            value,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchScope {
    BaseObject = 0,
    SingleLevel = 1,
    WholeSubtree = 2,
}

impl SearchScope {
    pub fn from_u32(v: u32) -> Option<Self> {
        match v {
            0 => Some(SearchScope::BaseObject),
            1 => Some(SearchScope::SingleLevel),
            2 => Some(SearchScope::WholeSubtree),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DerefAliases {
    NeverDerefAliases = 0,
    DerefInSearching = 1,
    DerefFindingBaseObj = 2,
    DerefAlways = 3,
}

impl DerefAliases {
    pub fn from_u32(v: u32) -> Option<Self> {
        match v {
            0 => Some(DerefAliases::NeverDerefAliases),
            1 => Some(DerefAliases::DerefInSearching),
            2 => Some(DerefAliases::DerefFindingBaseObj),
            3 => Some(DerefAliases::DerefAlways),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterAttributeValueAssertion {
    pub name: String,
    pub value: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubstringPart {
    Initial(Vec<u8>),
    Any(Vec<u8>),
    Final(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterSubstrings {
    pub name: String,
    pub parts: Vec<SubstringPart>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterExtensible {
    pub rule: Option<String>,
    pub name: Option<String>,
    pub value: Vec<u8>,
    pub dn_attributes: bool,
}

/// Deepest filter nesting accepted from a string or off the wire.
pub const MAX_FILTER_DEPTH: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
    EqualityMatch(FilterAttributeValueAssertion),
    Substrings(FilterSubstrings),
    GreaterOrEqual(FilterAttributeValueAssertion),
    LessOrEqual(FilterAttributeValueAssertion),
    Present(String),
    ApproxMatch(FilterAttributeValueAssertion),
    ExtensibleMatch(FilterExtensible),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindAuth {
    Simple(String),
    Sasl {
        mechanism: String,
        credentials: Option<Vec<u8>>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MsgBind {
    pub version: u32,
    pub name: String,
    pub auth: BindAuth,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MsgBindResponse {
    pub result: LdapResult,
    pub server_sasl_creds: Option<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MsgSearch {
    pub base_object: String,
    pub scope: SearchScope,
    pub deref: DerefAliases,
    pub size_limit: u32,
    pub time_limit: u32,
    pub types_only: bool,
    pub filter: Filter,
    pub attributes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartialAttribute {
    pub name: String,
    pub values: Vec<Vec<u8>>,
}

impl PartialAttribute {
    pub fn new(name: &str, values: &[&str]) -> Self {
        Self {
            name: name.to_owned(),
            values: values.iter().map(|v| v.as_bytes().to_vec()).collect(),
        }
    }

    /// Values as text; bytes that are not UTF-8 are replaced.
    pub fn values_lossy(&self) -> Vec<String> {
        self.values
            .iter()
            .map(|v| String::from_utf8_lossy(v).into_owned())
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MsgSearchResultEntry {
    pub name: String,
    pub attributes: Vec<PartialAttribute>,
}

impl MsgSearchResultEntry {
    pub fn attribute(&self, name: &str) -> Option<&PartialAttribute> {
        self.attributes
            .iter()
            .find(|a| a.name.eq_ignore_ascii_case(name))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModifyOperation {
    Add = 0,
    Delete = 1,
    Replace = 2,
    Increment = 3,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Modification {
    pub operation: ModifyOperation,
    pub attribute: PartialAttribute,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MsgModify {
    pub object: String,
    pub changes: Vec<Modification>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MsgAdd {
    pub entry: String,
    pub attributes: Vec<PartialAttribute>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MsgModifyDn {
    pub entry: String,
    pub new_rdn: String,
    pub delete_old_rdn: bool,
    pub new_superior: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MsgCompare {
    pub entry: String,
    pub assertion: FilterAttributeValueAssertion,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MsgExtended {
    pub name: String,
    pub value: Option<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MsgExtendedResponse {
    pub result: LdapResult,
    pub name: Option<String>,
    pub value: Option<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MsgIntermediate {
    pub name: Option<String>,
    pub value: Option<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageParams {
    Bind(MsgBind),
    BindResponse(MsgBindResponse),
    Unbind,
    Search(MsgSearch),
    SearchResultEntry(MsgSearchResultEntry),
    SearchResultReference(Vec<String>),
    SearchResultDone(LdapResult),
    Modify(MsgModify),
    ModifyResponse(LdapResult),
    Add(MsgAdd),
    AddResponse(LdapResult),
    Delete(String),
    DeleteResponse(LdapResult),
    ModifyDn(MsgModifyDn),
    ModifyDnResponse(LdapResult),
    Compare(MsgCompare),
    CompareResponse(LdapResult),
    Abandon(MessageId),
    Extended(MsgExtended),
    ExtendedResponse(MsgExtendedResponse),
    Intermediate(MsgIntermediate),
}

/// Fieldless tag of [`MessageParams`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    BindRequest,
    BindResponse,
    UnbindRequest,
    SearchRequest,
    SearchResultEntry,
    SearchResultReference,
    SearchResultDone,
    ModifyRequest,
    ModifyResponse,
    AddRequest,
    AddResponse,
    DelRequest,
    DelResponse,
    ModifyDnRequest,
    ModifyDnResponse,
    CompareRequest,
    CompareResponse,
    AbandonRequest,
    ExtendedRequest,
    ExtendedResponse,
    IntermediateResponse,
}

impl MessageType {
    /// The terminal reply a request expects; `None` for requests the server never answers.
    pub fn expected_reply(self) -> Option<MessageType> {
        match self {
            MessageType::BindRequest => Some(MessageType::BindResponse),
            MessageType::SearchRequest => Some(MessageType::SearchResultDone),
            MessageType::ModifyRequest => Some(MessageType::ModifyResponse),
            MessageType::AddRequest => Some(MessageType::AddResponse),
            MessageType::DelRequest => Some(MessageType::DelResponse),
            MessageType::ModifyDnRequest => Some(MessageType::ModifyDnResponse),
            MessageType::CompareRequest => Some(MessageType::CompareResponse),
            MessageType::ExtendedRequest => Some(MessageType::ExtendedResponse),
            _ => None,
        }
    }

    /// Whether this response ends its operation.
    pub fn is_terminal(self) -> bool {
        !matches!(
            self,
            MessageType::SearchResultEntry
                | MessageType::SearchResultReference
                | MessageType::IntermediateResponse
        )
    }
}

impl MessageParams {
    pub fn message_type(&self) -> MessageType {
        match self {
            MessageParams::Bind(_) => MessageType::BindRequest,
            MessageParams::BindResponse(_) => MessageType::BindResponse,
            MessageParams::Unbind => MessageType::UnbindRequest,
            MessageParams::Search(_) => MessageType::SearchRequest,
            MessageParams::SearchResultEntry(_) => MessageType::SearchResultEntry,
            MessageParams::SearchResultReference(_) => MessageType::SearchResultReference,
            MessageParams::SearchResultDone(_) => MessageType::SearchResultDone,
            MessageParams::Modify(_) => MessageType::ModifyRequest,
            MessageParams::ModifyResponse(_) => MessageType::ModifyResponse,
            MessageParams::Add(_) => MessageType::AddRequest,
            MessageParams::AddResponse(_) => MessageType::AddResponse,
            MessageParams::Delete(_) => MessageType::DelRequest,
            MessageParams::DeleteResponse(_) => MessageType::DelResponse,
            MessageParams::ModifyDn(_) => MessageType::ModifyDnRequest,
            MessageParams::ModifyDnResponse(_) => MessageType::ModifyDnResponse,
            MessageParams::Compare(_) => MessageType::CompareRequest,
            MessageParams::CompareResponse(_) => MessageType::CompareResponse,
            MessageParams::Abandon(_) => MessageType::AbandonRequest,
            MessageParams::Extended(_) => MessageType::ExtendedRequest,
            MessageParams::ExtendedResponse(_) => MessageType::ExtendedResponse,
            MessageParams::Intermediate(_) => MessageType::IntermediateResponse,
        }
    }

    /// The LDAPResult carried by a response, if it has one.
    pub fn result(&self) -> Option<&LdapResult> {
        match self {
            MessageParams::BindResponse(r) => Some(&r.result),
            MessageParams::ExtendedResponse(r) => Some(&r.result),
            MessageParams::SearchResultDone(r)
            | MessageParams::ModifyResponse(r)
            | MessageParams::AddResponse(r)
            | MessageParams::DeleteResponse(r)
            | MessageParams::ModifyDnResponse(r)
            | MessageParams::CompareResponse(r) => Some(r),
            _ => None,
        }
    }

    pub fn into_result(self) -> Option<LdapResult> {
        match self {
            MessageParams::BindResponse(r) => Some(r.result),
            MessageParams::ExtendedResponse(r) => Some(r.result),
            MessageParams::SearchResultDone(r)
            | MessageParams::ModifyResponse(r)
            | MessageParams::AddResponse(r)
            | MessageParams::DeleteResponse(r)
            | MessageParams::ModifyDnResponse(r)
            | MessageParams::CompareResponse(r) => Some(r),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub params: MessageParams,
    pub controls: Vec<Control>,
}

impl Message {
    pub fn new(id: MessageId, params: MessageParams) -> Self {
        Self {
            id,
            params,
            controls: Vec::new(),
        }
    }

    pub fn message_type(&self) -> MessageType {
        self.params.message_type()
    }
}

#[test]
fn expected_reply_table() {
    assert_eq!(
        MessageType::SearchRequest.expected_reply(),
        Some(MessageType::SearchResultDone)
    );
    assert_eq!(MessageType::AbandonRequest.expected_reply(), None);
    assert_eq!(MessageType::UnbindRequest.expected_reply(), None);
    assert!(!MessageType::SearchResultEntry.is_terminal());
    assert!(!MessageType::IntermediateResponse.is_terminal());
    assert!(MessageType::ExtendedResponse.is_terminal());
}

#[test]
fn result_success() {
    assert!(LdapResult::new(ResultCode::SUCCESS).success().is_ok());
    let e = LdapResult::new(ResultCode::INVALID_CREDENTIALS)
        .success()
        .unwrap_err();
    assert!(matches!(
        e,
        crate::LdapError::Protocol { code: ResultCode::INVALID_CREDENTIALS, .. }
    ));
    assert_eq!(ResultCode::REFERRAL.to_string(), "referral (10)");
}
