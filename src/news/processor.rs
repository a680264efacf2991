use std::sync::Arc;

use rand::seq::SliceRandom;
use tracing::{debug, warn};

use super::item::NewsItem;
use super::store::{NewsLog, PendingBuffer};
use crate::common::config::NewsConfig;
use crate::membership::sample::NeighborSample;
use crate::membership::view::{View, ViewComparator};
use crate::network::message::{Message, PullRequest};
use crate::network::node::NodeAddress;
use crate::node::effects::{Effects, LeaderEvent, TimerKind};

/*
    Leader-sequenced news log.

    Authors hand items to the leader, which numbers them and commits them in
    order. Everyone else commits strictly by sequence number, parking items
    that arrive ahead of a gap until the gap closes. Gaps close through the
    leader's push to its safety set and through periodic pulls from
    better-informed neighbors.
*/

pub struct NewsProcessor {
    self_addr: NodeAddress,
    config: NewsConfig,
    comparator: Arc<dyn ViewComparator>,
    log: NewsLog,
    pending: PendingBuffer,
    outbox: Vec<NewsItem>,
    leader: Option<NodeAddress>,
    neighbors: NeighborSample,
}

impl NewsProcessor {
    pub fn new(self_addr: NodeAddress, config: NewsConfig, comparator: Arc<dyn ViewComparator>) -> Self {
        NewsProcessor {
            self_addr,
            config,
            comparator,
            log: NewsLog::new(),
            pending: PendingBuffer::new(),
            outbox: Vec::new(),
            leader: None,
            neighbors: NeighborSample::default(),
        }
    }

    pub fn log(&self) -> &NewsLog {
        &self.log
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn outbox_len(&self) -> usize {
        self.outbox.len()
    }

    pub fn leader(&self) -> Option<NodeAddress> {
        self.leader
    }

    /// The View this node advertises: its committed log length.
    pub fn view(&self) -> View {
        View::new(self.self_addr.id, self.log.len())
    }

    fn is_leader(&self) -> bool {
        self.leader == Some(self.self_addr)
    }

    pub fn start(&mut self, fx: &mut Effects) {
        let period = self.config.pull_period();
        fx.schedule(TimerKind::NewsPull, period, period);
    }

    pub fn publish(&mut self, title: impl Into<String>, fx: &mut Effects) {
        let item = NewsItem::new(title);
        if self.log.contains(&item) || self.outbox.contains(&item) {
            return;
        }
        debug!("authored {}", item);
        self.outbox.push(item);
        self.flush(fx);
    }

    fn flush(&mut self, fx: &mut Effects) {
        match self.leader {
            None => debug!("no leader yet, {} items buffered", self.outbox.len()),
            Some(leader) if leader == self.self_addr => {
                for item in std::mem::take(&mut self.outbox) {
                    if !self.log.contains(&item) {
                        self.commit_as_leader(item, fx);
                    }
                }
            }
            Some(leader) => {
                for item in &self.outbox {
                    fx.send(leader, Message::Content(item.clone()));
                }
            }
        }
    }

    pub fn on_leader(&mut self, event: LeaderEvent, fx: &mut Effects) {
        match event {
            LeaderEvent::Elected(leader) => {
                self.leader = Some(leader);
                self.flush(fx);
            }
            LeaderEvent::Lost(leader) => {
                if self.leader == Some(leader) {
                    self.leader = None;
                }
            }
        }
    }

    pub fn on_sample(&mut self, sample: &NeighborSample) {
        if sample.is_empty() {
            return;
        }
        self.neighbors = sample.clone();
    }

    pub fn on_content(&mut self, from: NodeAddress, item: NewsItem, fx: &mut Effects) {
        if self.log.contains(&item) {
            return;
        }
        if self.is_leader() {
            self.commit_as_leader(item, fx);
            return;
        }

        let Some(sequence) = item.sequence else {
            debug!("unsequenced {} from {} while not leader, dropping", item, from);
            return;
        };
        if sequence < self.log.len() {
            debug!("{} from {} conflicts with a committed slot, dropping", item, from);
            return;
        }
        if self.pending.insert(item) {
            self.drain();
        }
    }

    fn commit_as_leader(&mut self, item: NewsItem, fx: &mut Effects) {
        let committed = item.with_sequence(self.log.len());
        if !self.commit(committed.clone()) {
            return;
        }
        self.pending.prune_below(self.log.len());

        let safety_set: Vec<NodeAddress> = self
            .neighbors
            .ranked(self.comparator.as_ref())
            .into_iter()
            .map(|(address, _)| address)
            .filter(|address| *address != self.self_addr)
            .take(self.config.safety_set_size)
            .collect();
        fx.broadcast(&safety_set, Message::Content(committed));
    }

    fn drain(&mut self) {
        while let Some(item) = self.pending.take(self.log.len()) {
            if !self.commit(item) {
                break;
            }
        }
        self.pending.prune_below(self.log.len());
    }

    fn commit(&mut self, item: NewsItem) -> bool {
        let title = item.title.clone();
        match self.log.append(item) {
            Ok(()) => {
                debug!("committed {}#{}", title, self.log.len() - 1);
                self.outbox.retain(|pending| pending.title != title);
                true
            }
            Err(e) => {
                warn!("not committing {}: {}", title, e);
                false
            }
        }
    }

    pub fn on_pull_timer(&mut self, fx: &mut Effects) {
        if !self.outbox.is_empty() {
            self.flush(fx);
        }
        if self.is_leader() {
            return;
        }

        let expected = self.log.len();
        let ahead: Vec<NodeAddress> = self
            .neighbors
            .neighbors
            .iter()
            .filter(|(address, view)| view.score > expected && *address != self.self_addr)
            .map(|(address, _)| *address)
            .collect();
        if let Some(peer) = ahead.choose(&mut rand::thread_rng()) {
            debug!("pulling from {} at {}", peer, expected);
            fx.send(*peer, Message::PullRequest(PullRequest { expected }));
        }
    }

    pub fn on_pull_request(&self, from: NodeAddress, request: PullRequest, fx: &mut Effects) {
        for item in self.log.since(request.expected) {
            fx.send(from, Message::Content(item.clone()));
        }
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::common::crypto::Pubkey;
    use crate::membership::view::ScoreRanking;

    fn address(id: u8) -> NodeAddress {
        NodeAddress::new(Pubkey { key: [id; 32] }, format!("127.0.0.1:{}", 5000 + id as u16).parse().unwrap())
    }

    fn processor(id: u8) -> NewsProcessor {
        NewsProcessor::new(address(id), NewsConfig::default(), Arc::new(ScoreRanking))
    }

    fn sample(entries: &[(u8, u64)]) -> NeighborSample {
        NeighborSample::new(
            entries
                .iter()
                .map(|(id, score)| (address(*id), View::new(address(*id).id, *score)))
                .collect(),
            vec![],
        )
    }

    fn leader(id: u8) -> NewsProcessor {
        let mut news = processor(id);
        news.on_leader(LeaderEvent::Elected(address(id)), &mut Effects::new());
        news
    }

    fn follower_with(count: u64) -> NewsProcessor {
        let mut news = processor(2);
        news.on_leader(LeaderEvent::Elected(address(1)), &mut Effects::new());
        for sequence in 0..count {
            news.on_content(address(1), NewsItem::sequenced(format!("i{}", sequence), sequence), &mut Effects::new());
        }
        assert_eq!(news.log().len(), count);
        news
    }

    #[test]
    fn test_gap_waits_then_drains() {
        let mut news = follower_with(3);

        news.on_content(address(1), NewsItem::sequenced("i4", 4), &mut Effects::new());
        assert_eq!(news.log().len(), 3);
        assert_eq!(news.pending_len(), 1);

        news.on_content(address(1), NewsItem::sequenced("i3", 3), &mut Effects::new());

        assert_eq!(news.log().len(), 5);
        assert_eq!(news.view().score, 5);
        assert_eq!(news.pending_len(), 0);
        assert_eq!(news.log().titles(), vec!["i0", "i1", "i2", "i3", "i4"]);
    }

    #[test]
    fn test_leader_dedups_by_title() {
        let mut news = leader(1);

        news.on_content(address(5), NewsItem::new("scoop"), &mut Effects::new());
        news.on_content(address(6), NewsItem::new("scoop"), &mut Effects::new());

        assert_eq!(news.log().len(), 1);
        assert_eq!(news.log().get(0).and_then(|item| item.sequence), Some(0));
    }

    #[test]
    fn test_leader_pushes_to_best_ranked_safety_set() {
        let mut news = leader(1);
        news.on_sample(&sample(&[(2, 1), (3, 9), (4, 5), (5, 7), (6, 0)]));

        let mut fx = Effects::new();
        news.on_content(address(6), NewsItem::new("scoop"), &mut fx);

        let targets: Vec<u8> = fx.outbound.iter().map(|(address, _)| address.id.key[0]).collect();
        assert_eq!(targets, vec![3, 5, 4]);
        for (_, message) in &fx.outbound {
            assert_eq!(message, &Message::Content(NewsItem::sequenced("scoop", 0)));
            match message {
                Message::Content(item) => assert_eq!(item.sequence, Some(0)),
                other => panic!("Wrong Message Type: {:?}", other),
            }
        }
    }

    #[test]
    fn test_follower_drops_committed_stale_and_unsequenced() {
        let mut news = follower_with(2);

        news.on_content(address(1), NewsItem::sequenced("i0", 0), &mut Effects::new());
        news.on_content(address(1), NewsItem::sequenced("other", 1), &mut Effects::new());
        news.on_content(address(3), NewsItem::new("loose"), &mut Effects::new());

        assert_eq!(news.log().len(), 2);
        assert_eq!(news.pending_len(), 0);
    }

    #[test]
    fn test_items_ahead_of_gap_are_never_committed_early() {
        let mut news = follower_with(0);

        for sequence in [5, 3, 2, 9] {
            news.on_content(address(1), NewsItem::sequenced(format!("i{}", sequence), sequence), &mut Effects::new());
        }

        assert_eq!(news.log().len(), 0);
        assert_eq!(news.pending_len(), 4);
    }

    #[test]
    fn test_author_buffers_until_leader_then_until_committed() {
        let mut news = processor(2);

        let mut fx = Effects::new();
        news.publish("scoop", &mut fx);
        assert!(fx.outbound.is_empty());
        assert_eq!(news.outbox_len(), 1);

        let mut fx = Effects::new();
        news.on_leader(LeaderEvent::Elected(address(1)), &mut fx);
        assert_eq!(fx.sent_to(&address(1)), vec![&Message::Content(NewsItem::new("scoop"))]);

        // Retransmitted on the pull tick while uncommitted
        let mut fx = Effects::new();
        news.on_pull_timer(&mut fx);
        assert_eq!(fx.sent_to(&address(1)).len(), 1);

        news.on_content(address(1), NewsItem::sequenced("scoop", 0), &mut Effects::new());
        assert_eq!(news.outbox_len(), 0);

        let mut fx = Effects::new();
        news.on_pull_timer(&mut fx);
        assert!(fx.sent_to(&address(1)).is_empty());
    }

    #[test]
    fn test_leader_commits_own_items_directly() {
        let mut news = processor(1);
        news.publish("first", &mut Effects::new());
        news.publish("first", &mut Effects::new());

        news.on_leader(LeaderEvent::Elected(address(1)), &mut Effects::new());
        news.publish("second", &mut Effects::new());

        assert_eq!(news.log().titles(), vec!["first", "second"]);
        assert_eq!(news.outbox_len(), 0);
    }

    #[test]
    fn test_lost_leader_stops_submission() {
        let mut news = processor(2);
        news.on_leader(LeaderEvent::Elected(address(1)), &mut Effects::new());

        news.on_leader(LeaderEvent::Lost(address(1)), &mut Effects::new());
        let mut fx = Effects::new();
        news.publish("scoop", &mut fx);

        assert_eq!(news.leader(), None);
        assert!(fx.outbound.is_empty());
    }

    #[test]
    fn test_pull_targets_only_better_informed_neighbors() {
        let mut news = follower_with(3);

        news.on_sample(&sample(&[(3, 1), (4, 3)]));
        let mut fx = Effects::new();
        news.on_pull_timer(&mut fx);
        assert!(fx.outbound.is_empty());

        news.on_sample(&sample(&[(3, 1), (4, 3), (5, 8)]));
        let mut fx = Effects::new();
        news.on_pull_timer(&mut fx);
        assert_eq!(
            fx.sent_to(&address(5)),
            vec![&Message::PullRequest(PullRequest { expected: 3 })]
        );
    }

    #[test]
    fn test_leader_does_not_pull() {
        let mut news = leader(1);
        news.on_sample(&sample(&[(3, 8)]));

        let mut fx = Effects::new();
        news.on_pull_timer(&mut fx);

        assert!(fx.outbound.is_empty());
    }

    #[test]
    fn test_pull_request_resends_suffix_in_order() {
        let news = follower_with(5);

        let mut fx = Effects::new();
        news.on_pull_request(address(7), PullRequest { expected: 2 }, &mut fx);

        let sequences: Vec<Option<u64>> = fx
            .sent_to(&address(7))
            .into_iter()
            .map(|message| match message {
                Message::Content(item) => item.sequence,
                other => panic!("Wrong Message Type: {:?}", other),
            })
            .collect();
        assert_eq!(sequences, vec![Some(2), Some(3), Some(4)]);
    }

    #[test]
    fn test_pull_repairs_lagging_follower() {
        let source = follower_with(4);
        let mut lagging = follower_with(1);

        let mut fx = Effects::new();
        source.on_pull_request(address(2), PullRequest { expected: lagging.log().len() }, &mut fx);
        for (_, message) in fx.outbound {
            if let Message::Content(item) = message {
                lagging.on_content(address(2), item, &mut Effects::new());
            }
        }

        assert_eq!(lagging.log().titles(), source.log().titles());
    }

    proptest! {
        #[test]
        fn prop_any_delivery_order_commits_gap_free(
            order in Just((0u64..12).collect::<Vec<_>>()).prop_shuffle(),
            repeats in proptest::collection::vec(0u64..12, 0..8),
        ) {
            let mut news = follower_with(0);

            for sequence in order.iter().chain(repeats.iter()) {
                news.on_content(address(1), NewsItem::sequenced(format!("i{}", sequence), *sequence), &mut Effects::new());
            }

            prop_assert_eq!(news.log().len(), 12);
            prop_assert_eq!(news.pending_len(), 0);
            for sequence in 0..12u64 {
                let item = news.log().get(sequence).unwrap();
                prop_assert_eq!(item.sequence, Some(sequence));
                prop_assert_eq!(&item.title, &format!("i{}", sequence));
            }
        }
    }
}
