use crate::asn1::{
    self, Decoder, Encoder, TAG_BOOLEAN, TAG_ENUMERATED, TAG_INTEGER, TAG_OCTET_STRING,
    TAG_SEQUENCE, TAG_SET,
};
use crate::error::CodecError;
use crate::ldap::{
    BindAuth, Control, DerefAliases, Filter, FilterAttributeValueAssertion, FilterExtensible,
    FilterSubstrings, LdapResult, Message, MessageParams, Modification, ModifyOperation, MsgAdd,
    MsgBind, MsgBindResponse, MsgCompare, MsgExtended, MsgExtendedResponse, MsgIntermediate,
    MsgModify, MsgModifyDn, MsgSearch, MsgSearchResultEntry, PartialAttribute, ResultCode,
    SearchScope, SubstringPart, MAX_FILTER_DEPTH,
};

pub const TAG_BIND_REQUEST: u8 = 0x60;
pub const TAG_BIND_RESPONSE: u8 = 0x61;
pub const TAG_UNBIND_REQUEST: u8 = 0x42;
pub const TAG_SEARCH_REQUEST: u8 = 0x63;
pub const TAG_SEARCH_RESULT_ENTRY: u8 = 0x64;
pub const TAG_SEARCH_RESULT_DONE: u8 = 0x65;
pub const TAG_MODIFY_REQUEST: u8 = 0x66;
pub const TAG_MODIFY_RESPONSE: u8 = 0x67;
pub const TAG_ADD_REQUEST: u8 = 0x68;
pub const TAG_ADD_RESPONSE: u8 = 0x69;
pub const TAG_DEL_REQUEST: u8 = 0x4a;
pub const TAG_DEL_RESPONSE: u8 = 0x6b;
pub const TAG_MODIFY_DN_REQUEST: u8 = 0x6c;
pub const TAG_MODIFY_DN_RESPONSE: u8 = 0x6d;
pub const TAG_COMPARE_REQUEST: u8 = 0x6e;
pub const TAG_COMPARE_RESPONSE: u8 = 0x6f;
pub const TAG_ABANDON_REQUEST: u8 = 0x50;
pub const TAG_SEARCH_RESULT_REFERENCE: u8 = 0x73;
pub const TAG_EXTENDED_REQUEST: u8 = 0x77;
pub const TAG_EXTENDED_RESPONSE: u8 = 0x78;
pub const TAG_INTERMEDIATE_RESPONSE: u8 = 0x79;

const TAG_CONTROLS: u8 = 0xa0;
const TAG_REFERRAL: u8 = 0xa3;
const TAG_AUTH_SIMPLE: u8 = 0x80;
const TAG_AUTH_SASL: u8 = 0xa3;
const TAG_SERVER_SASL_CREDS: u8 = 0x87;
const TAG_NEW_SUPERIOR: u8 = 0x80;
const TAG_EXT_REQ_NAME: u8 = 0x80;
const TAG_EXT_REQ_VALUE: u8 = 0x81;
const TAG_EXT_RESP_NAME: u8 = 0x8a;
const TAG_EXT_RESP_VALUE: u8 = 0x8b;
const TAG_INTERMEDIATE_NAME: u8 = 0x80;
const TAG_INTERMEDIATE_VALUE: u8 = 0x81;

const TAG_FILTER_AND: u8 = 0xa0;
const TAG_FILTER_OR: u8 = 0xa1;
const TAG_FILTER_NOT: u8 = 0xa2;
const TAG_FILTER_EQUALITY: u8 = 0xa3;
const TAG_FILTER_SUBSTRINGS: u8 = 0xa4;
const TAG_FILTER_GE: u8 = 0xa5;
const TAG_FILTER_LE: u8 = 0xa6;
const TAG_FILTER_PRESENT: u8 = 0x87;
const TAG_FILTER_APPROX: u8 = 0xa8;
const TAG_FILTER_EXTENSIBLE: u8 = 0xa9;

pub fn encode(msg: &Message) -> Vec<u8> {
    let mut e = Encoder::new();
    e.start_seq(TAG_SEQUENCE);
    e.write_int(msg.id as i64);
    write_params(&mut e, &msg.params);
    if !msg.controls.is_empty() {
        e.start_seq(TAG_CONTROLS);
        for c in &msg.controls {
            write_control(&mut e, c);
        }
        e.end_seq();
    }
    e.end_seq();
    e.encode()
}

fn write_params(e: &mut Encoder, params: &MessageParams) {
    match params {
        MessageParams::Bind(b) => {
            e.start_seq(TAG_BIND_REQUEST);
            e.write_int(b.version as i64);
            e.write_octet_string(b.name.as_bytes());
            match &b.auth {
                BindAuth::Simple(password) => {
                    e.write_octet_string_with_tag(TAG_AUTH_SIMPLE, password.as_bytes())
                }
                BindAuth::Sasl {
                    mechanism,
                    credentials,
                } => {
                    e.start_seq(TAG_AUTH_SASL);
                    e.write_octet_string(mechanism.as_bytes());
                    if let Some(c) = credentials {
                        e.write_octet_string(c);
                    }
                    e.end_seq();
                }
            }
            e.end_seq();
        }
        MessageParams::BindResponse(r) => {
            e.start_seq(TAG_BIND_RESPONSE);
            write_result(e, &r.result);
            if let Some(c) = &r.server_sasl_creds {
                e.write_octet_string_with_tag(TAG_SERVER_SASL_CREDS, c);
            }
            e.end_seq();
        }
        MessageParams::Unbind => e.write_tlv(TAG_UNBIND_REQUEST, &[]),
        MessageParams::Search(s) => {
            e.start_seq(TAG_SEARCH_REQUEST);
            e.write_octet_string(s.base_object.as_bytes());
            e.write_enum(s.scope as u32);
            e.write_enum(s.deref as u32);
            e.write_int(s.size_limit as i64);
            e.write_int(s.time_limit as i64);
            e.write_bool(s.types_only);
            write_filter(e, &s.filter);
            e.start_seq(TAG_SEQUENCE);
            for a in &s.attributes {
                e.write_octet_string(a.as_bytes());
            }
            e.end_seq();
            e.end_seq();
        }
        MessageParams::SearchResultEntry(entry) => {
            e.start_seq(TAG_SEARCH_RESULT_ENTRY);
            e.write_octet_string(entry.name.as_bytes());
            write_attributes(e, &entry.attributes);
            e.end_seq();
        }
        MessageParams::SearchResultReference(urls) => {
            e.start_seq(TAG_SEARCH_RESULT_REFERENCE);
            for u in urls {
                e.write_octet_string(u.as_bytes());
            }
            e.end_seq();
        }
        MessageParams::SearchResultDone(r) => write_result_op(e, TAG_SEARCH_RESULT_DONE, r),
        MessageParams::Modify(m) => {
            e.start_seq(TAG_MODIFY_REQUEST);
            e.write_octet_string(m.object.as_bytes());
            e.start_seq(TAG_SEQUENCE);
            for change in &m.changes {
                e.start_seq(TAG_SEQUENCE);
                e.write_enum(change.operation as u32);
                write_attribute(e, &change.attribute);
                e.end_seq();
            }
            e.end_seq();
            e.end_seq();
        }
        MessageParams::ModifyResponse(r) => write_result_op(e, TAG_MODIFY_RESPONSE, r),
        MessageParams::Add(a) => {
            e.start_seq(TAG_ADD_REQUEST);
            e.write_octet_string(a.entry.as_bytes());
            write_attributes(e, &a.attributes);
            e.end_seq();
        }
        MessageParams::AddResponse(r) => write_result_op(e, TAG_ADD_RESPONSE, r),
        MessageParams::Delete(dn) => e.write_tlv(TAG_DEL_REQUEST, dn.as_bytes()),
        MessageParams::DeleteResponse(r) => write_result_op(e, TAG_DEL_RESPONSE, r),
        MessageParams::ModifyDn(m) => {
            e.start_seq(TAG_MODIFY_DN_REQUEST);
            e.write_octet_string(m.entry.as_bytes());
            e.write_octet_string(m.new_rdn.as_bytes());
            e.write_bool(m.delete_old_rdn);
            if let Some(sup) = &m.new_superior {
                e.write_octet_string_with_tag(TAG_NEW_SUPERIOR, sup.as_bytes());
            }
            e.end_seq();
        }
        MessageParams::ModifyDnResponse(r) => write_result_op(e, TAG_MODIFY_DN_RESPONSE, r),
        MessageParams::Compare(c) => {
            e.start_seq(TAG_COMPARE_REQUEST);
            e.write_octet_string(c.entry.as_bytes());
            e.start_seq(TAG_SEQUENCE);
            e.write_octet_string(c.assertion.name.as_bytes());
            e.write_octet_string(&c.assertion.value);
            e.end_seq();
            e.end_seq();
        }
        MessageParams::CompareResponse(r) => write_result_op(e, TAG_COMPARE_RESPONSE, r),
        MessageParams::Abandon(id) => {
            e.write_int_with_tag(TAG_ABANDON_REQUEST, *id as i64)
        }
        MessageParams::Extended(x) => {
            e.start_seq(TAG_EXTENDED_REQUEST);
            e.write_octet_string_with_tag(TAG_EXT_REQ_NAME, x.name.as_bytes());
            if let Some(v) = &x.value {
                e.write_octet_string_with_tag(TAG_EXT_REQ_VALUE, v);
            }
            e.end_seq();
        }
        MessageParams::ExtendedResponse(x) => {
            e.start_seq(TAG_EXTENDED_RESPONSE);
            write_result(e, &x.result);
            if let Some(n) = &x.name {
                e.write_octet_string_with_tag(TAG_EXT_RESP_NAME, n.as_bytes());
            }
            if let Some(v) = &x.value {
                e.write_octet_string_with_tag(TAG_EXT_RESP_VALUE, v);
            }
            e.end_seq();
        }
        MessageParams::Intermediate(x) => {
            e.start_seq(TAG_INTERMEDIATE_RESPONSE);
            if let Some(n) = &x.name {
                e.write_octet_string_with_tag(TAG_INTERMEDIATE_NAME, n.as_bytes());
            }
            if let Some(v) = &x.value {
                e.write_octet_string_with_tag(TAG_INTERMEDIATE_VALUE, v);
            }
            e.end_seq();
        }
    }
}

fn write_result(e: &mut Encoder, r: &LdapResult) {
    e.write_enum(r.code.0);
    e.write_octet_string(r.matched_dn.as_bytes());
    e.write_octet_string(r.diag.as_bytes());
    if !r.referrals.is_empty() {
        e.start_seq(TAG_REFERRAL);
        for url in &r.referrals {
            e.write_octet_string(url.as_bytes());
        }
        e.end_seq();
    }
}

fn write_result_op(e: &mut Encoder, tag: u8, r: &LdapResult) {
    e.start_seq(tag);
    write_result(e, r);
    e.end_seq();
}

fn write_attribute(e: &mut Encoder, attr: &PartialAttribute) {
    e.start_seq(TAG_SEQUENCE);
    e.write_octet_string(attr.name.as_bytes());
    e.start_seq(TAG_SET);
    for v in &attr.values {
        e.write_octet_string(v);
    }
    e.end_seq();
    e.end_seq();
}

fn write_attributes(e: &mut Encoder, attrs: &[PartialAttribute]) {
    e.start_seq(TAG_SEQUENCE);
    for a in attrs {
        write_attribute(e, a);
    }
    e.end_seq();
}

fn write_control(e: &mut Encoder, c: &Control) {
    e.start_seq(TAG_SEQUENCE);
    e.write_octet_string(c.oid.as_bytes());
    if c.critical {
        e.write_bool(true);
    }
    if let Some(v) = &c.value {
        e.write_octet_string(v);
    }
    e.end_seq();
}

fn write_ava(e: &mut Encoder, tag: u8, ava: &FilterAttributeValueAssertion) {
    e.start_seq(tag);
    e.write_octet_string(ava.name.as_bytes());
    e.write_octet_string(&ava.value);
    e.end_seq();
}

pub fn write_filter(e: &mut Encoder, f: &Filter) {
    match f {
        Filter::And(items) | Filter::Or(items) => {
            e.start_seq(if matches!(f, Filter::And(_)) {
                TAG_FILTER_AND
            } else {
                TAG_FILTER_OR
            });
            for item in items {
                write_filter(e, item);
            }
            e.end_seq();
        }
        Filter::Not(inner) => {
            e.start_seq(TAG_FILTER_NOT);
            write_filter(e, inner);
            e.end_seq();
        }
        Filter::EqualityMatch(ava) => write_ava(e, TAG_FILTER_EQUALITY, ava),
        Filter::GreaterOrEqual(ava) => write_ava(e, TAG_FILTER_GE, ava),
        Filter::LessOrEqual(ava) => write_ava(e, TAG_FILTER_LE, ava),
        Filter::ApproxMatch(ava) => write_ava(e, TAG_FILTER_APPROX, ava),
        Filter::Substrings(s) => {
            e.start_seq(TAG_FILTER_SUBSTRINGS);
            e.write_octet_string(s.name.as_bytes());
            e.start_seq(TAG_SEQUENCE);
            for part in &s.parts {
                let (tag, v) = match part {
                    SubstringPart::Initial(v) => (0x80, v),
                    SubstringPart::Any(v) => (0x81, v),
                    SubstringPart::Final(v) => (0x82, v),
                };
                e.write_octet_string_with_tag(tag, v);
            }
            e.end_seq();
            e.end_seq();
        }
        Filter::Present(name) => e.write_octet_string_with_tag(TAG_FILTER_PRESENT, name.as_bytes()),
        Filter::ExtensibleMatch(x) => {
            e.start_seq(TAG_FILTER_EXTENSIBLE);
            if let Some(rule) = &x.rule {
                e.write_octet_string_with_tag(0x81, rule.as_bytes());
            }
            if let Some(name) = &x.name {
                e.write_octet_string_with_tag(0x82, name.as_bytes());
            }
            e.write_octet_string_with_tag(0x83, &x.value);
            if x.dn_attributes {
                e.write_bool_with_tag(0x84, true);
            }
            e.end_seq();
        }
    }
}

/// Splits one complete message off the front of `data`.
///
/// `Ok(None)` means more bytes are needed.
pub fn parse_message(data: &[u8]) -> Result<Option<(Message, usize)>, CodecError> {
    split_message(data, decode)
}

/// Like [`parse_message`], but only accepts what a server sends to a client.
pub fn parse_response(data: &[u8]) -> Result<Option<(Message, usize)>, CodecError> {
    split_message(data, decode_response)
}

fn split_message(
    data: &[u8],
    decode_one: fn(&[u8]) -> Result<Message, CodecError>,
) -> Result<Option<(Message, usize)>, CodecError> {
    let len = match asn1::pdu_len(data)? {
        Some(len) if len <= data.len() => len,
        _ => return Ok(None),
    };
    Ok(Some((decode_one(&data[..len])?, len)))
}

/// Decodes exactly one LDAPMessage.
pub fn decode(data: &[u8]) -> Result<Message, CodecError> {
    decode_message(data, false)
}

/// Decodes one LDAPMessage, rejecting request operations.
pub fn decode_response(data: &[u8]) -> Result<Message, CodecError> {
    decode_message(data, true)
}

fn is_response_tag(tag: u8) -> bool {
    matches!(
        tag,
        TAG_BIND_RESPONSE
            | TAG_SEARCH_RESULT_ENTRY
            | TAG_SEARCH_RESULT_DONE
            | TAG_SEARCH_RESULT_REFERENCE
            | TAG_MODIFY_RESPONSE
            | TAG_ADD_RESPONSE
            | TAG_DEL_RESPONSE
            | TAG_MODIFY_DN_RESPONSE
            | TAG_COMPARE_RESPONSE
            | TAG_EXTENDED_RESPONSE
            | TAG_INTERMEDIATE_RESPONSE
    )
}

fn decode_message(data: &[u8], responses_only: bool) -> Result<Message, CodecError> {
    let mut outer = Decoder::new(data);
    let mut d = outer.sequence(TAG_SEQUENCE)?;
    if !outer.is_empty() {
        return Err(CodecError::TrailingData("message"));
    }
    let id = d.read_int(TAG_INTEGER)?;
    let id = i32::try_from(id).map_err(|_| CodecError::IntegerOverflow)?;
    if id < 0 {
        return Err(CodecError::Invalid("negative message id"));
    }
    let (tag, body) = d.read_tlv()?;
    if responses_only && !is_response_tag(tag) {
        return Err(CodecError::UnknownOperation(tag));
    }
    let params = decode_params(tag, body)?;
    let controls = match d.optional(TAG_CONTROLS)? {
        Some(v) => decode_controls(v)?,
        None => Vec::new(),
    };
    Ok(Message {
        id,
        params,
        controls,
    })
}

fn decode_params(tag: u8, body: &[u8]) -> Result<MessageParams, CodecError> {
    let mut d = Decoder::new(body);
    let params = match tag {
        TAG_BIND_REQUEST => {
            let version = d.read_u32(TAG_INTEGER)?;
            let name = d.read_string(TAG_OCTET_STRING, "bind name")?;
            let auth = match d.read_tlv()? {
                (TAG_AUTH_SIMPLE, v) => BindAuth::Simple(asn1::to_string(v, "password")?),
                (TAG_AUTH_SASL, v) => {
                    let mut sasl = Decoder::new(v);
                    BindAuth::Sasl {
                        mechanism: sasl.read_string(TAG_OCTET_STRING, "sasl mechanism")?,
                        credentials: sasl.optional(TAG_OCTET_STRING)?.map(<[u8]>::to_vec),
                    }
                }
                _ => return Err(CodecError::Invalid("bind authentication choice")),
            };
            MessageParams::Bind(MsgBind {
                version,
                name,
                auth,
            })
        }
        TAG_BIND_RESPONSE => MessageParams::BindResponse(MsgBindResponse {
            result: decode_result(&mut d)?,
            server_sasl_creds: d.optional(TAG_SERVER_SASL_CREDS)?.map(<[u8]>::to_vec),
        }),
        TAG_UNBIND_REQUEST => MessageParams::Unbind,
        TAG_SEARCH_REQUEST => {
            let base_object = d.read_string(TAG_OCTET_STRING, "search base")?;
            let scope = SearchScope::from_u32(d.read_u32(TAG_ENUMERATED)?)
                .ok_or(CodecError::Invalid("search scope"))?;
            let deref = DerefAliases::from_u32(d.read_u32(TAG_ENUMERATED)?)
                .ok_or(CodecError::Invalid("deref aliases"))?;
            let size_limit = d.read_u32(TAG_INTEGER)?;
            let time_limit = d.read_u32(TAG_INTEGER)?;
            let types_only = d.read_bool(TAG_BOOLEAN)?;
            let filter = decode_filter(&mut d)?;
            let mut attrs = d.sequence(TAG_SEQUENCE)?;
            let mut attributes = Vec::new();
            while !attrs.is_empty() {
                attributes.push(attrs.read_string(TAG_OCTET_STRING, "attribute selector")?);
            }
            MessageParams::Search(MsgSearch {
                base_object,
                scope,
                deref,
                size_limit,
                time_limit,
                types_only,
                filter,
                attributes,
            })
        }
        TAG_SEARCH_RESULT_ENTRY => MessageParams::SearchResultEntry(MsgSearchResultEntry {
            name: d.read_string(TAG_OCTET_STRING, "entry name")?,
            attributes: decode_attributes(&mut d)?,
        }),
        TAG_SEARCH_RESULT_REFERENCE => {
            let mut urls = Vec::new();
            while !d.is_empty() {
                urls.push(d.read_string(TAG_OCTET_STRING, "reference url")?);
            }
            MessageParams::SearchResultReference(urls)
        }
        TAG_SEARCH_RESULT_DONE => MessageParams::SearchResultDone(decode_result(&mut d)?),
        TAG_MODIFY_REQUEST => {
            let object = d.read_string(TAG_OCTET_STRING, "modify object")?;
            let mut seq = d.sequence(TAG_SEQUENCE)?;
            let mut changes = Vec::new();
            while !seq.is_empty() {
                let mut change = seq.sequence(TAG_SEQUENCE)?;
                let operation = match change.read_u32(TAG_ENUMERATED)? {
                    0 => ModifyOperation::Add,
                    1 => ModifyOperation::Delete,
                    2 => ModifyOperation::Replace,
                    3 => ModifyOperation::Increment,
                    _ => return Err(CodecError::Invalid("modify operation")),
                };
                changes.push(Modification {
                    operation,
                    attribute: decode_attribute(&mut change)?,
                });
            }
            MessageParams::Modify(MsgModify { object, changes })
        }
        TAG_MODIFY_RESPONSE => MessageParams::ModifyResponse(decode_result(&mut d)?),
        TAG_ADD_REQUEST => MessageParams::Add(MsgAdd {
            entry: d.read_string(TAG_OCTET_STRING, "add entry")?,
            attributes: decode_attributes(&mut d)?,
        }),
        TAG_ADD_RESPONSE => MessageParams::AddResponse(decode_result(&mut d)?),
        TAG_DEL_REQUEST => MessageParams::Delete(asn1::to_string(body, "delete dn")?),
        TAG_DEL_RESPONSE => MessageParams::DeleteResponse(decode_result(&mut d)?),
        TAG_MODIFY_DN_REQUEST => MessageParams::ModifyDn(MsgModifyDn {
            entry: d.read_string(TAG_OCTET_STRING, "modify dn entry")?,
            new_rdn: d.read_string(TAG_OCTET_STRING, "new rdn")?,
            delete_old_rdn: d.read_bool(TAG_BOOLEAN)?,
            new_superior: d
                .optional(TAG_NEW_SUPERIOR)?
                .map(|v| asn1::to_string(v, "new superior"))
                .transpose()?,
        }),
        TAG_MODIFY_DN_RESPONSE => MessageParams::ModifyDnResponse(decode_result(&mut d)?),
        TAG_COMPARE_REQUEST => {
            let entry = d.read_string(TAG_OCTET_STRING, "compare entry")?;
            let mut ava = d.sequence(TAG_SEQUENCE)?;
            MessageParams::Compare(MsgCompare {
                entry,
                assertion: FilterAttributeValueAssertion {
                    name: ava.read_string(TAG_OCTET_STRING, "compare attribute")?,
                    value: ava.read_octets(TAG_OCTET_STRING)?,
                },
            })
        }
        TAG_COMPARE_RESPONSE => MessageParams::CompareResponse(decode_result(&mut d)?),
        TAG_ABANDON_REQUEST => {
            let id = asn1::decode_int(body)?;
            MessageParams::Abandon(i32::try_from(id).map_err(|_| CodecError::IntegerOverflow)?)
        }
        TAG_EXTENDED_REQUEST => MessageParams::Extended(MsgExtended {
            name: d.read_string(TAG_EXT_REQ_NAME, "extended request name")?,
            value: d.optional(TAG_EXT_REQ_VALUE)?.map(<[u8]>::to_vec),
        }),
        TAG_EXTENDED_RESPONSE => MessageParams::ExtendedResponse(MsgExtendedResponse {
            result: decode_result(&mut d)?,
            name: d
                .optional(TAG_EXT_RESP_NAME)?
                .map(|v| asn1::to_string(v, "extended response name"))
                .transpose()?,
            value: d.optional(TAG_EXT_RESP_VALUE)?.map(<[u8]>::to_vec),
        }),
        TAG_INTERMEDIATE_RESPONSE => MessageParams::Intermediate(MsgIntermediate {
            name: d
                .optional(TAG_INTERMEDIATE_NAME)?
                .map(|v| asn1::to_string(v, "intermediate response name"))
                .transpose()?,
            value: d.optional(TAG_INTERMEDIATE_VALUE)?.map(<[u8]>::to_vec),
        }),
        other => return Err(CodecError::UnknownOperation(other)),
    };
    Ok(params)
}

fn decode_result(d: &mut Decoder<'_>) -> Result<LdapResult, CodecError> {
    let code = ResultCode(d.read_u32(TAG_ENUMERATED)?);
    let matched_dn = d.read_string(TAG_OCTET_STRING, "matched dn")?;
    let diag = String::from_utf8_lossy(d.expect(TAG_OCTET_STRING)?).into_owned();
    let mut referrals = Vec::new();
    if let Some(v) = d.optional(TAG_REFERRAL)? {
        let mut urls = Decoder::new(v);
        while !urls.is_empty() {
            referrals.push(urls.read_string(TAG_OCTET_STRING, "referral url")?);
        }
    }
    Ok(LdapResult {
        code,
        matched_dn,
        diag,
        referrals,
    })
}

fn decode_attribute(d: &mut Decoder<'_>) -> Result<PartialAttribute, CodecError> {
    let mut attr = d.sequence(TAG_SEQUENCE)?;
    let name = attr.read_string(TAG_OCTET_STRING, "attribute type")?;
    let mut set = attr.sequence(TAG_SET)?;
    let mut values = Vec::new();
    while !set.is_empty() {
        values.push(set.read_octets(TAG_OCTET_STRING)?);
    }
    Ok(PartialAttribute { name, values })
}

fn decode_attributes(d: &mut Decoder<'_>) -> Result<Vec<PartialAttribute>, CodecError> {
    let mut seq = d.sequence(TAG_SEQUENCE)?;
    let mut attrs = Vec::new();
    while !seq.is_empty() {
        attrs.push(decode_attribute(&mut seq)?);
    }
    Ok(attrs)
}

fn decode_controls(data: &[u8]) -> Result<Vec<Control>, CodecError> {
    let mut d = Decoder::new(data);
    let mut controls = Vec::new();
    while !d.is_empty() {
        let mut c = d.sequence(TAG_SEQUENCE)?;
        let oid = c.read_string(TAG_OCTET_STRING, "control type")?;
        let critical = match c.optional(TAG_BOOLEAN)? {
            Some([b]) => *b != 0,
            Some(_) => return Err(CodecError::Invalid("boolean length")),
            None => false,
        };
        let value = c.optional(TAG_OCTET_STRING)?.map(<[u8]>::to_vec);
        controls.push(Control {
            oid,
            critical,
            value,
        });
    }
    Ok(controls)
}

fn decode_ava(v: &[u8]) -> Result<FilterAttributeValueAssertion, CodecError> {
    let mut d = Decoder::new(v);
    Ok(FilterAttributeValueAssertion {
        name: d.read_string(TAG_OCTET_STRING, "filter attribute")?,
        value: d.read_octets(TAG_OCTET_STRING)?,
    })
}

fn decode_filter_set(v: &[u8], depth: usize) -> Result<Vec<Filter>, CodecError> {
    let mut d = Decoder::new(v);
    let mut items = Vec::new();
    while !d.is_empty() {
        items.push(decode_nested_filter(&mut d, depth)?);
    }
    Ok(items)
}

pub fn decode_filter(d: &mut Decoder<'_>) -> Result<Filter, CodecError> {
    decode_nested_filter(d, 1)
}

fn decode_nested_filter(d: &mut Decoder<'_>, depth: usize) -> Result<Filter, CodecError> {
    if depth > MAX_FILTER_DEPTH {
        return Err(CodecError::Invalid("filter nesting"));
    }
    let (tag, v) = d.read_tlv()?;
    let filter = match tag {
        TAG_FILTER_AND => Filter::And(decode_filter_set(v, depth + 1)?),
        TAG_FILTER_OR => Filter::Or(decode_filter_set(v, depth + 1)?),
        TAG_FILTER_NOT => {
            Filter::Not(Box::new(decode_nested_filter(&mut Decoder::new(v), depth + 1)?))
        }
        TAG_FILTER_EQUALITY => Filter::EqualityMatch(decode_ava(v)?),
        TAG_FILTER_GE => Filter::GreaterOrEqual(decode_ava(v)?),
        TAG_FILTER_LE => Filter::LessOrEqual(decode_ava(v)?),
        TAG_FILTER_APPROX => Filter::ApproxMatch(decode_ava(v)?),
        TAG_FILTER_PRESENT => Filter::Present(asn1::to_string(v, "present filter")?),
        TAG_FILTER_SUBSTRINGS => {
            let mut s = Decoder::new(v);
            let name = s.read_string(TAG_OCTET_STRING, "substrings attribute")?;
            let mut seq = s.sequence(TAG_SEQUENCE)?;
            let mut parts = Vec::new();
            while !seq.is_empty() {
                parts.push(match seq.read_tlv()? {
                    (0x80, p) => SubstringPart::Initial(p.to_vec()),
                    (0x81, p) => SubstringPart::Any(p.to_vec()),
                    (0x82, p) => SubstringPart::Final(p.to_vec()),
                    _ => return Err(CodecError::Invalid("substring choice")),
                });
            }
            Filter::Substrings(FilterSubstrings { name, parts })
        }
        TAG_FILTER_EXTENSIBLE => {
            let mut x = Decoder::new(v);
            let rule = x
                .optional(0x81)?
                .map(|r| asn1::to_string(r, "matching rule"))
                .transpose()?;
            let name = x
                .optional(0x82)?
                .map(|n| asn1::to_string(n, "extensible attribute"))
                .transpose()?;
            let value = x.read_octets(0x83)?;
            let dn_attributes = match x.optional(0x84)? {
                Some([b]) => *b != 0,
                Some(_) => return Err(CodecError::Invalid("boolean length")),
                None => false,
            };
            Filter::ExtensibleMatch(FilterExtensible {
                rule,
                name,
                value,
                dn_attributes,
            })
        }
        _ => return Err(CodecError::Invalid("filter choice")),
    };
    Ok(filter)
}

#[cfg(test)]
fn from_hex(s: &str) -> Vec<u8> {
    hex::decode(s.as_bytes()).unwrap()
}

#[test]
fn search_test() {
    let data = from_hex("3029020102632404000a01020a0100020100020100010100a00f8703617861a30804027373040273733000");
    let (m, size) = parse_message(&data).unwrap().unwrap();
    assert_eq!(size, 43);
    assert_eq!(m.id, 2);
    if let MessageParams::Search(s) = m.params {
        assert_eq!(s.base_object, "");
        assert_eq!(s.scope, SearchScope::WholeSubtree);
        assert_eq!(s.deref, DerefAliases::NeverDerefAliases);
        assert_eq!(s.size_limit, 0);
        assert_eq!(s.time_limit, 0);
        assert!(!s.types_only);
        assert!(s.attributes.is_empty());
        if let Filter::And(items) = s.filter {
            assert_eq!(items.len(), 2);
            assert_eq!(items[0], Filter::Present("axa".to_owned()));
            assert_eq!(
                items[1],
                Filter::EqualityMatch(FilterAttributeValueAssertion {
                    name: "ss".to_owned(),
                    value: b"ss".to_vec(),
                })
            );
        } else {
            unreachable!();
        }
    } else {
        unreachable!();
    }
}

#[test]
fn bind_test() {
    let data = from_hex("3013020101600e0201030402787880056865736c6f");
    let (m, size) = parse_message(&data).unwrap().unwrap();
    assert_eq!(size, 21);
    assert_eq!(m.id, 1);
    if let MessageParams::Bind(ref s) = m.params {
        assert_eq!(s.name, "xx");
        assert_eq!(s.auth, BindAuth::Simple("heslo".to_owned()));
        assert_eq!(s.version, 3);
    } else {
        unreachable!();
    }
    assert_eq!(encode(&m), data);
}

#[test]
fn partial_input_test() {
    let data = from_hex("3013020101600e0201030402787880056865736c6f");
    assert!(parse_message(&data[..1]).unwrap().is_none());
    assert!(parse_message(&data[..20]).unwrap().is_none());
    let mut two = data.clone();
    two.extend_from_slice(&data);
    let (_, used) = parse_message(&two).unwrap().unwrap();
    assert_eq!(used, data.len());
}

#[test]
fn search_done_with_referral_test() {
    let mut result = LdapResult::new(ResultCode::REFERRAL);
    result.referrals = vec!["ldap://other/".to_owned()];
    let msg = Message {
        id: 300,
        params: MessageParams::SearchResultDone(result.clone()),
        controls: vec![Control::new("1.2.840.113556.1.4.319", true, Some(vec![0x30, 0x00]))],
    };
    let bytes = encode(&msg);
    let decoded = decode(&bytes).unwrap();
    assert_eq!(decoded.id, 300);
    assert_eq!(decoded.params, MessageParams::SearchResultDone(result));
    assert_eq!(decoded.controls, msg.controls);
}

#[test]
fn entry_with_binary_value_test() {
    let entry = MsgSearchResultEntry {
        name: "cn=a,dc=example,dc=com".to_owned(),
        attributes: vec![PartialAttribute {
            name: "jpegPhoto".to_owned(),
            values: vec![vec![0xff, 0xd8, 0x00, 0x9f]],
        }],
    };
    let bytes = encode(&Message::new(7, MessageParams::SearchResultEntry(entry.clone())));
    let m = decode(&bytes).unwrap();
    assert_eq!(m.params, MessageParams::SearchResultEntry(entry));
}

#[test]
fn unknown_operation_test() {
    // 30 05 | 02 01 01 | 5f 00
    let data = from_hex("300502010150ff");
    assert!(decode(&data).is_err());
    let data = from_hex("30050201015f00");
    assert_eq!(decode(&data).unwrap_err(), CodecError::UnknownOperation(0x5f));
}

#[test]
fn extended_response_test() {
    // 30 16 | 02 01 05 | 78 11 | 0a 01 00 | 04 00 | 04 00 | 8b 08 "dn:cn=me"
    let data = from_hex("301602010578110a0100040004008b08646e3a636e3d6d65");
    let m = decode(&data).unwrap();
    assert_eq!(m.id, 5);
    match m.params {
        MessageParams::ExtendedResponse(r) => {
            assert!(r.result.is_success());
            assert_eq!(r.name, None);
            assert_eq!(r.value, Some(b"dn:cn=me".to_vec()));
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[cfg(test)]
fn tlv(tag: u8, body: &[u8]) -> Vec<u8> {
    let mut out = vec![tag];
    out.extend(asn1::encode_len(body.len()));
    out.extend_from_slice(body);
    out
}

#[cfg(test)]
fn nested_not_search(depth: usize) -> Vec<u8> {
    let mut filter = tlv(TAG_FILTER_PRESENT, b"cn");
    for _ in 0..depth {
        filter = tlv(TAG_FILTER_NOT, &filter);
    }
    let mut op = tlv(TAG_OCTET_STRING, b"");
    op.extend(tlv(TAG_ENUMERATED, &[2]));
    op.extend(tlv(TAG_ENUMERATED, &[0]));
    op.extend(tlv(TAG_INTEGER, &[0]));
    op.extend(tlv(TAG_INTEGER, &[0]));
    op.extend(tlv(TAG_BOOLEAN, &[0]));
    op.extend(filter);
    op.extend(tlv(TAG_SEQUENCE, &[]));
    let mut msg = tlv(TAG_INTEGER, &[1]);
    msg.extend(tlv(TAG_SEARCH_REQUEST, &op));
    tlv(TAG_SEQUENCE, &msg)
}

#[test]
fn filter_nesting_test() {
    let shallow = nested_not_search(MAX_FILTER_DEPTH - 1);
    assert!(matches!(decode(&shallow).unwrap().params, MessageParams::Search(_)));

    let deep = nested_not_search(5_000);
    assert_eq!(parse_message(&deep).unwrap_err(), CodecError::Invalid("filter nesting"));
}

#[test]
fn responses_only_test() {
    let bind = from_hex("3013020101600e0201030402787880056865736c6f");
    assert_eq!(parse_response(&bind).unwrap_err(), CodecError::UnknownOperation(0x60));
    assert_eq!(
        parse_response(&nested_not_search(5_000)).unwrap_err(),
        CodecError::UnknownOperation(TAG_SEARCH_REQUEST)
    );

    let done = from_hex("300c02010765070a010004000400");
    let (m, used) = parse_response(&done).unwrap().unwrap();
    assert_eq!((m.id, used), (7, done.len()));
    assert_eq!(m.params, MessageParams::SearchResultDone(LdapResult::new(ResultCode::SUCCESS)));
}
