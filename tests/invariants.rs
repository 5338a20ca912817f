use std::collections::{BTreeMap, HashSet};

use rater_ledger::sheet::CellRef;
use rater_ledger::{
    AllocationStatus, Corpus, ConversationRecord, FrequencyTable, GlobalOrder, InMemorySheets,
    MemoryLogStore, Metric, PacingConfig, RaterRegistry, ScheduleOutcome, Session, cohen_kappa,
    fleiss_kappa, observed_agreement,
};

const RATERS: [&str; 3] = ["r1", "r2", "r3"];

fn corpus(conversations: usize) -> Corpus {
    let records = (0..conversations).flat_map(|conv| {
        (0..(conv % 3) + 1).map(move |msg| ConversationRecord {
            conversation_id: format!("thread-{conv}"),
            message_id: format!("thread-{conv}-{msg}"),
            speaker: format!("user{msg}"),
            text: format!("body {conv}/{msg}"),
            metadata: BTreeMap::new(),
        })
    });
    Corpus::from_records(records)
}

fn session<'a>(
    sheets: &'a InMemorySheets,
    seed: u64,
) -> Session<&'a InMemorySheets, MemoryLogStore> {
    Session::new(
        corpus(12),
        MemoryLogStore::new(),
        RaterRegistry::from_pairs(RATERS.iter().map(|rater| (*rater, format!("{rater}.sheet")))),
        sheets,
        seed,
        PacingConfig::unpaced(),
    )
    .unwrap()
}

fn sheets() -> InMemorySheets {
    InMemorySheets::with_sheets(RATERS.iter().map(|rater| format!("{rater}.sheet")))
}

/// Fill every rating cell of every written row so the rater becomes schedulable again.
fn complete_all(sheets: &InMemorySheets, rater: &str) {
    let sheet = format!("{rater}.sheet");
    let rows = sheets.rows(&sheet).unwrap();
    for row in 3..=rows.len() as u32 {
        for metric in Metric::ALL {
            sheets
                .set_cell(&sheet, &CellRef::new(metric.column(), row), metric.labels()[1])
                .unwrap();
        }
    }
}

#[test]
fn allocations_never_repeat_a_conversation_for_a_rater() {
    let sheets = sheets();
    let mut session = session(&sheets, 5);
    let mut seen: HashSet<String> = HashSet::new();
    for round in [2usize, 3, 1, 4, 5] {
        let ScheduleOutcome::Allocated(batch) = session.schedule("r1", round).unwrap() else {
            panic!("rater r1 should be schedulable");
        };
        for conversation in &batch.conversations {
            assert!(seen.insert(conversation.clone()), "{conversation} allocated twice");
        }
        complete_all(&sheets, "r1");
        session.reconcile("r1").unwrap();
    }
    assert_eq!(seen.len(), 12);
    let all: HashSet<String> = session.corpus().conversation_ids().cloned().collect();
    assert_eq!(seen, all);
}

#[test]
fn log_keys_are_unique_and_status_matches_ratings() {
    let sheets = sheets();
    let mut session = session(&sheets, 11);
    for rater in RATERS {
        session.schedule(rater, 4).unwrap();
    }
    // r2 completes everything, r3 answers only the first question on its first row.
    complete_all(&sheets, "r2");
    sheets
        .set_cell("r3.sheet", &CellRef::new("E", 3), "Yes - Direct Content")
        .unwrap();
    for rater in RATERS {
        session.reconcile(rater).unwrap();
    }

    let mut keys = HashSet::new();
    for entry in session.log().entries() {
        assert!(keys.insert((entry.message_id.clone(), entry.rater_id.clone())));
        let complete = Metric::ALL.iter().all(|metric| entry.ratings.get(*metric).is_some());
        assert_eq!(entry.status == AllocationStatus::Done, complete);
    }
    let progress = session.progress();
    assert_eq!(progress["r2"].allocated, 0);
    assert_eq!(progress["r1"].done, 0);
    assert!(progress["r3"].allocated > 0);
}

#[test]
fn reconcile_twice_is_a_no_op() {
    let sheets = sheets();
    let mut session = session(&sheets, 3);
    session.schedule("r1", 3).unwrap();
    complete_all(&sheets, "r1");
    session.reconcile("r1").unwrap();
    let first = session.log().clone();
    let persisted = session.store().persist_count();

    let report = session.reconcile("r1").unwrap();
    assert_eq!(report.updated, 0);
    assert_eq!(session.log(), &first);
    assert_eq!(session.store().persist_count(), persisted + 1);
}

#[test]
fn global_order_is_deterministic() {
    let first = GlobalOrder::from_corpus(&corpus(30), 99);
    let second = GlobalOrder::from_corpus(&corpus(30), 99);
    assert_eq!(first.ids(), second.ids());

    let sheets_a = sheets();
    let sheets_b = sheets();
    let mut a = session(&sheets_a, 17);
    let mut b = session(&sheets_b, 17);
    a.schedule("r1", 5).unwrap();
    b.schedule("r1", 5).unwrap();
    assert_eq!(sheets_a.rows("r1.sheet").unwrap(), sheets_b.rows("r1.sheet").unwrap());
}

#[test]
fn agreement_statistics_respect_bounds() {
    // Exhaustive over every two-question, three-rater code matrix on three categories.
    let mut checked = 0;
    for mask in 0..3usize.pow(6) {
        let mut digits = mask;
        let mut codes = vec![Vec::new(), Vec::new()];
        for slot in 0..6 {
            codes[slot / 3].push(digits % 3);
            digits /= 3;
        }
        let table = FrequencyTable::from_codes(&codes, 3);
        let observed = observed_agreement(&table).unwrap();
        assert!((0.0..=1.0).contains(&observed));
        if let Some(kappa) = fleiss_kappa(&table) {
            assert!(kappa <= 1.0 + 1e-12, "fleiss {kappa} for {codes:?}");
            checked += 1;
        }
        let first: Vec<usize> = codes.iter().map(|row| row[0]).collect();
        let second: Vec<usize> = codes.iter().map(|row| row[1]).collect();
        if let Some(kappa) = cohen_kappa(&first, &second) {
            assert!(kappa <= 1.0 + 1e-12);
        }
    }
    assert!(checked > 0);
}
