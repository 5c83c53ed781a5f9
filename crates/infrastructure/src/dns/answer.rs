//! Answer construction: locally-generated error and CHAOS answers are
//! built directly in wire format; resolver replies are re-encoded through
//! hickory so the client gets its own header id and question back with a
//! size budget applied, no matter how the resolver rewrote the message.

use hickory_proto::op::{Edns, Message, MessageType, OpCode, ResponseCode};
use hickory_proto::rr::{Name, Record, RecordType};
use hickory_proto::serialize::binary::{BinDecodable, BinDecoder};
use unwind_dns_domain::query::flags;
use unwind_dns_domain::{EdnsInfo, FrontendError, QueryHeader, QuestionInfo, Transport};

/// Receive buffer size advertised in our own OPT records.
pub const EDNS_ADVERTISED_SIZE: u16 = 4096;

/// TXT payload of CHAOS-class version queries.
pub const SERVER_VERSION: &str = "unwind";

const OPT_RR_SIZE: usize = 11;

fn push_header(
    out: &mut Vec<u8>,
    hdr: &QueryHeader,
    extra_flags: u16,
    rc: u8,
    counts: [u16; 4],
) {
    out.extend_from_slice(&hdr.id.to_be_bytes());
    let echoed = hdr.flags & (flags::OPCODE_MASK | flags::RD | flags::CD);
    let flags_word = echoed | extra_flags | flags::QR | rc as u16;
    out.extend_from_slice(&flags_word.to_be_bytes());
    for c in counts {
        out.extend_from_slice(&c.to_be_bytes());
    }
}

fn push_opt_rr(out: &mut Vec<u8>, edns: &EdnsInfo) {
    out.push(0); // root owner
    out.extend_from_slice(&41u16.to_be_bytes());
    out.extend_from_slice(&EDNS_ADVERTISED_SIZE.to_be_bytes());
    out.push(0); // extended rcode
    out.push(0); // version
    out.push(if edns.dnssec_ok { 0x80 } else { 0 });
    out.push(0);
    out.extend_from_slice(&0u16.to_be_bytes()); // rdlen
}

/// Error answer carrying `rc`, echoing the client's id, opcode, RD and CD
/// bits, the question when it parsed, and an OPT record when the client
/// sent one.
pub fn encode_error(
    hdr: &QueryHeader,
    question_wire: Option<&[u8]>,
    edns: &EdnsInfo,
    rc: u8,
) -> Vec<u8> {
    let qd = question_wire.is_some() as u16;
    let ar = edns.present as u16;
    let mut out = Vec::with_capacity(
        12 + question_wire.map_or(0, <[u8]>::len) + if edns.present { OPT_RR_SIZE } else { 0 },
    );
    push_header(&mut out, hdr, 0, rc, [qd, 0, 0, ar]);
    if let Some(q) = question_wire {
        out.extend_from_slice(q);
    }
    if edns.present {
        push_opt_rr(&mut out, edns);
    }
    out
}

/// NOERROR answer for `version.server.` / `version.bind.`: one TXT record
/// pointing back at the question name.
pub fn encode_chaos(hdr: &QueryHeader, question_wire: &[u8]) -> Vec<u8> {
    let txt = SERVER_VERSION.as_bytes();
    let mut out = Vec::with_capacity(12 + question_wire.len() + 13 + txt.len());
    push_header(&mut out, hdr, flags::RA, 0, [1, 1, 0, 0]);
    out.extend_from_slice(question_wire);
    out.extend_from_slice(&0xc00cu16.to_be_bytes()); // pointer to qname
    out.extend_from_slice(&16u16.to_be_bytes()); // TXT
    out.extend_from_slice(&3u16.to_be_bytes()); // CH
    out.extend_from_slice(&0u32.to_be_bytes()); // TTL
    out.extend_from_slice(&((txt.len() + 1) as u16).to_be_bytes());
    out.push(txt.len() as u8);
    out.extend_from_slice(txt);
    out
}

fn strip_unrequested_dnssec(records: Vec<Record>, dnssec_ok: bool) -> Vec<Record> {
    if dnssec_ok {
        return records;
    }
    records
        .into_iter()
        .filter(|r| r.record_type() != RecordType::RRSIG)
        .collect()
}

/// Re-encodes a complete resolver reply for the client.
///
/// The output carries the client's original header id and question, the
/// resolver's response flags and sections, and fits the transport budget
/// (65535 for TCP, the client's EDNS payload size for UDP). Positive
/// answers are minimized: authority and additional sections are dropped.
/// A reply that cannot fit is replaced by a truncated, question-only
/// response.
pub fn rebuild_reply(
    reply_wire: &[u8],
    qinfo: &QuestionInfo,
    hdr: &QueryHeader,
    edns: &EdnsInfo,
    transport: Transport,
) -> Result<Vec<u8>, FrontendError> {
    let mut reply =
        Message::from_vec(reply_wire).map_err(|e| FrontendError::WireFormat(e.to_string()))?;
    let reply_hdr = *reply.header();

    let budget = match transport {
        Transport::Tcp => u16::MAX as usize,
        Transport::Udp => edns.max_udp_payload(),
    };

    let mut decoder = BinDecoder::new(&qinfo.qname_wire);
    let qname = Name::read(&mut decoder).map_err(|e| FrontendError::WireFormat(e.to_string()))?;
    let mut question =
        hickory_proto::op::Query::query(qname, RecordType::from(qinfo.qtype));
    if let Some(rq) = reply.queries().first() {
        question.set_query_class(rq.query_class());
    }

    let mut out = Message::new();
    out.set_id(hdr.id)
        .set_message_type(MessageType::Response)
        .set_op_code(OpCode::Query)
        .set_recursion_desired(hdr.recursion_desired())
        .set_recursion_available(true)
        .set_authoritative(reply_hdr.authoritative())
        .set_authentic_data(reply_hdr.authentic_data() && edns.dnssec_ok)
        .set_checking_disabled(hdr.checking_disabled())
        .set_response_code(reply_hdr.response_code());
    out.add_query(question.clone());

    let answers = strip_unrequested_dnssec(reply.take_answers(), edns.dnssec_ok);
    let minimize = reply_hdr.response_code() == ResponseCode::NoError && !answers.is_empty();
    out.add_answers(answers);
    if !minimize {
        out.add_name_servers(strip_unrequested_dnssec(
            reply.take_name_servers(),
            edns.dnssec_ok,
        ));
        for record in strip_unrequested_dnssec(reply.take_additionals(), edns.dnssec_ok) {
            out.add_additional(record);
        }
    }

    if edns.present {
        let mut opt = Edns::new();
        opt.set_max_payload(EDNS_ADVERTISED_SIZE);
        opt.set_version(0);
        opt.set_dnssec_ok(edns.dnssec_ok);
        out.set_edns(opt);
    }

    let encoded = out
        .to_vec()
        .map_err(|e| FrontendError::WireFormat(e.to_string()))?;
    if encoded.len() <= budget {
        return Ok(encoded);
    }

    // Does not fit: truncated response, question only.
    let mut truncated = Message::new();
    truncated
        .set_id(hdr.id)
        .set_message_type(MessageType::Response)
        .set_op_code(OpCode::Query)
        .set_recursion_desired(hdr.recursion_desired())
        .set_recursion_available(true)
        .set_checking_disabled(hdr.checking_disabled())
        .set_truncated(true)
        .set_response_code(reply_hdr.response_code());
    truncated.add_query(question);
    if edns.present {
        let mut opt = Edns::new();
        opt.set_max_payload(EDNS_ADVERTISED_SIZE);
        opt.set_version(0);
        opt.set_dnssec_ok(edns.dnssec_ok);
        truncated.set_edns(opt);
    }
    truncated
        .to_vec()
        .map_err(|e| FrontendError::WireFormat(e.to_string()))
}
