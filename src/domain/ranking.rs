// Leaderboard ranking rules.
//
// Ranks are distinct and sequential: equal scores never share a position, and ties keep the
// order they had in the input snapshot so equal participants do not swap between snapshots.

use super::{Participant, ParticipantKey, RankedParticipant};
use std::collections::HashMap;

pub fn rank(participants: &[Participant]) -> Vec<RankedParticipant> {
    let mut ordered: Vec<&Participant> = participants.iter().collect();
    // `sort_by` is stable.
    ordered.sort_by(|a, b| b.realtime_score.cmp(&a.realtime_score));

    ordered
        .into_iter()
        .zip(1u32..)
        .map(|(participant, realtime_ranking)| RankedParticipant {
            participant: participant.clone(),
            realtime_ranking,
        })
        .collect()
}

/// Position change per participant between two ranked lists (positive means moved up).
///
/// Participants missing from `previous` get no entry.
pub fn rank_deltas(
    previous: &[RankedParticipant],
    current: &[RankedParticipant],
) -> HashMap<ParticipantKey, i64> {
    let previous_index: HashMap<&ParticipantKey, usize> = previous
        .iter()
        .enumerate()
        .map(|(index, ranked)| (&ranked.participant.key, index))
        .collect();

    current
        .iter()
        .enumerate()
        .filter_map(|(index, ranked)| {
            let key = &ranked.participant.key;
            previous_index
                .get(key)
                .map(|&before| (key.clone(), before as i64 - index as i64))
        })
        .collect()
}
