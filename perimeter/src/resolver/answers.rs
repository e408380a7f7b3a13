//! Record extraction from DNS responses.

use hickory_proto::op::Message;
use hickory_proto::rr::{RData, RecordType};

/// One answer record in normalized form.
///
/// `name` and `data` are lowercased with the trailing dot removed, so they
/// line up with asset keys without further massaging.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExtractedAnswer {
    pub name: String,
    pub rtype: RecordType,
    pub data: String,
}

/// Extracts the answers the engine understands from a response message.
pub fn extract_answers(msg: &Message) -> Vec<ExtractedAnswer> {
    msg.answers()
        .iter()
        .filter_map(|record| {
            let data = match record.data()? {
                RData::A(a) => a.0.to_string(),
                RData::AAAA(aaaa) => aaaa.0.to_string(),
                RData::CNAME(cname) => trim_fqdn(&cname.0.to_utf8()),
                RData::PTR(ptr) => trim_fqdn(&ptr.0.to_utf8()),
                RData::NS(ns) => trim_fqdn(&ns.0.to_utf8()),
                RData::MX(mx) => trim_fqdn(&mx.exchange().to_utf8()),
                _ => return None,
            };
            Some(ExtractedAnswer {
                name: trim_fqdn(&record.name().to_utf8()),
                rtype: record.record_type(),
                data: data.to_lowercase(),
            })
        })
        .collect()
}

/// Keeps only the answers of the requested record type.
pub fn answers_by_type(
    answers: Vec<ExtractedAnswer>,
    qtype: RecordType,
) -> Vec<ExtractedAnswer> {
    answers.into_iter().filter(|a| a.rtype == qtype).collect()
}

fn trim_fqdn(name: &str) -> String {
    name.trim_end_matches('.').to_lowercase()
}
