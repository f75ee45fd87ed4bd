// Candidate ranker.
//
// Orders admissible variants by their score records. The order is total and
// independent of input order: score descending, then fewer metric
// violations, then higher style compliance, then the lexicographically
// smaller variant id. Variants with no score record are left out, as are
// repeated variant ids. A variant with several records is ranked by its best
// one.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use chipforge_protocol::{ScoreRecord, Variant, VariantId};

pub fn rank(admissible: &[Variant], records: &[ScoreRecord]) -> Vec<VariantId> {
    let mut by_id: BTreeMap<&VariantId, &ScoreRecord> = BTreeMap::new();
    for r in records {
        by_id
            .entry(&r.variant_id)
            .and_modify(|best| {
                if compare(r, best) == Ordering::Less {
                    *best = r;
                }
            })
            .or_insert(r);
    }

    let mut seen = BTreeSet::new();
    let mut ranked: Vec<(&VariantId, &ScoreRecord)> = admissible
        .iter()
        .filter(|v| seen.insert(&v.id))
        .filter_map(|v| by_id.get(&v.id).map(|r| (&v.id, *r)))
        .collect();

    ranked.sort_by(|(a_id, a), (b_id, b)| compare(a, b).then_with(|| a_id.cmp(b_id)));
    ranked.into_iter().map(|(id, _)| id.clone()).collect()
}

/// Better records sort first.
fn compare(a: &ScoreRecord, b: &ScoreRecord) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| {
            a.metrics
                .total_violations()
                .cmp(&b.metrics.total_violations())
        })
        .then_with(|| {
            b.metrics
                .style_compliance
                .total_cmp(&a.metrics.style_compliance)
        })
}
