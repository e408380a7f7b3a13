//! Wildcard zone detection.
//!
//! A zone that resolves arbitrary subdomains would turn every guessed name
//! into a "discovery". Before an answer is accepted, the pool probes random
//! labels under the effective TLD+1 of the queried name through the
//! detection resolver; zones where every probe resolves are wildcards and
//! their answers are dropped. Verdicts are cached per apex.

use super::pool::{query_msg, ResolverPool};
use hickory_proto::op::{Message, ResponseCode};
use hickory_proto::rr::RecordType;
use rand::distributions::Alphanumeric;
use rand::Rng;
use tracing::debug;

/// Random labels probed per apex; all must resolve for a wildcard verdict.
const WILDCARD_PROBES: usize = 3;

/// Length of each random probe label.
const PROBE_LABEL_LEN: usize = 14;

impl ResolverPool {
    /// Returns `true` when the response's zone resolves random labels.
    pub(super) async fn wildcard_detected(&self, resp: &Message) -> bool {
        let Some(query) = resp.queries().first() else {
            return false;
        };
        let name = query.name().to_utf8().trim_end_matches('.').to_lowercase();

        let Some(apex) = psl::domain_str(&name).map(str::to_string) else {
            return false;
        };
        if let Some(flag) = self.wildcards.get(&apex) {
            return *flag;
        }

        let detected = self.probe_apex(&apex).await;
        if detected {
            debug!(apex, "Wildcard zone detected");
        }
        self.wildcards.insert(apex, detected);
        detected
    }

    /// Probes random labels under `apex`; a single non-resolving probe
    /// clears the zone.
    async fn probe_apex(&self, apex: &str) -> bool {
        for _ in 0..WILDCARD_PROBES {
            let probe = format!("{}.{}", random_label(), apex);
            if !self.probe_resolves(&probe).await {
                return false;
            }
        }
        true
    }

    /// One A query via the detection resolver; network failures count as
    /// "did not resolve" so flaky paths never poison the verdict cache
    /// toward dropping real answers.
    async fn probe_resolves(&self, name: &str) -> bool {
        let Ok(msg) = query_msg(name, RecordType::A) else {
            return false;
        };
        self.detector.limiter.acquire().await;
        match self.exchange(&self.detector, &msg).await {
            Ok(resp) => {
                resp.response_code() == ResponseCode::NoError && !resp.answers().is_empty()
            }
            Err(_) => false,
        }
    }
}

fn random_label() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(PROBE_LABEL_LEN)
        .map(|c| (c as char).to_ascii_lowercase())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_label_shape() {
        let label = random_label();
        assert_eq!(label.len(), PROBE_LABEL_LEN);
        assert!(label.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_eq!(label, label.to_lowercase());
    }

    #[test]
    fn test_labels_are_distinct() {
        assert_ne!(random_label(), random_label());
    }

    #[tokio::test]
    async fn test_cached_verdict_short_circuits() {
        let pool = ResolverPool::new();
        pool.wildcards.insert("example.com".to_string(), true);

        let msg = query_msg("www.example.com", RecordType::A).unwrap();
        // The question section carries the probed name.
        let mut resp = Message::new();
        resp.add_query(msg.queries()[0].clone());

        assert!(pool.wildcard_detected(&resp).await);
    }
}
