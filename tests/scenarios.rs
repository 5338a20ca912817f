use std::collections::BTreeMap;

use rater_ledger::sheet::CellRef;
use rater_ledger::{
    AllocationStatus, Corpus, ConversationRecord, InMemorySheets, LedgerError, MemoryLogStore,
    Metric, PacingConfig, RaterRegistry, ScheduleOutcome, Session,
};

fn build_corpus(conversations: usize, messages: usize) -> Corpus {
    let mut records = Vec::new();
    for conv in 0..conversations {
        for msg in 0..messages {
            records.push(ConversationRecord {
                conversation_id: format!("conv_{conv:02}"),
                message_id: format!("conv_{conv:02}_msg_{msg}"),
                speaker: if msg % 2 == 0 { "left" } else { "right" }.to_string(),
                text: format!("conversation {conv} message {msg}"),
                metadata: BTreeMap::new(),
            });
        }
    }
    Corpus::from_records(records)
}

fn build_session<'a>(
    sheets: &'a InMemorySheets,
    corpus: Corpus,
) -> Session<&'a InMemorySheets, MemoryLogStore> {
    Session::new(
        corpus,
        MemoryLogStore::new(),
        RaterRegistry::from_pairs([("r1", "sheet-r1"), ("r2", "sheet-r2")]),
        sheets,
        42,
        PacingConfig::unpaced(),
    )
    .unwrap()
}

fn fill(sheets: &InMemorySheets, sheet: &str, row: u32, labels: [&str; 4]) {
    for (metric, label) in Metric::ALL.iter().zip(labels) {
        sheets
            .set_cell(sheet, &CellRef::new(metric.column(), row), label)
            .unwrap();
    }
}

#[test]
fn two_of_ten_conversations_land_on_the_sheet() {
    let sheets = InMemorySheets::with_sheets(["sheet-r1", "sheet-r2"]);
    let mut session = build_session(&sheets, build_corpus(10, 8));
    assert_eq!(session.corpus().message_count(), 80);

    let ScheduleOutcome::Allocated(batch) = session.schedule("r1", 2).unwrap() else {
        panic!("first schedule must allocate");
    };
    let expected: Vec<String> = session.order().ids()[..2].to_vec();
    assert_eq!(batch.conversations, expected);
    assert_eq!(batch.messages.len(), 16);

    let rows = sheets.rows("sheet-r1").unwrap();
    let written: Vec<&str> = rows[2..].iter().map(|row| row[0].as_str()).collect();
    assert_eq!(written.len(), 16);
    assert!(written[..8].iter().all(|conv| *conv == expected[0]));
    assert!(written[8..].iter().all(|conv| *conv == expected[1]));

    let entries: Vec<_> = session.log().entries_for("r1").collect();
    assert_eq!(entries.len(), 16);
    assert!(
        entries
            .iter()
            .all(|entry| entry.status == AllocationStatus::Allocated)
    );
}

#[test]
fn second_schedule_is_refused_until_rows_are_done() {
    let sheets = InMemorySheets::with_sheets(["sheet-r1", "sheet-r2"]);
    let mut session = build_session(&sheets, build_corpus(10, 8));
    session.schedule("r1", 2).unwrap();
    let rows_before = sheets.rows("sheet-r1").unwrap();
    let log_before = session.log().clone();

    let outcome = session.schedule("r1", 1).unwrap();
    assert!(matches!(
        outcome,
        ScheduleOutcome::Conflict { outstanding: 16, .. }
    ));
    assert_eq!(sheets.rows("sheet-r1").unwrap(), rows_before);
    assert_eq!(session.log(), &log_before);
}

#[test]
fn filling_every_rating_marks_the_row_done() {
    let sheets = InMemorySheets::with_sheets(["sheet-r1", "sheet-r2"]);
    let mut session = build_session(&sheets, build_corpus(3, 1));
    let ScheduleOutcome::Allocated(batch) = session.schedule("r1", 1).unwrap() else {
        panic!("expected allocation");
    };
    let message_id = batch.messages[0].clone();
    let allocated_at = session
        .log()
        .get(&message_id, "r1")
        .unwrap()
        .last_updated_time;

    fill(
        &sheets,
        "sheet-r1",
        batch.start_row.unwrap(),
        [
            "Yes - Direct Content",
            "No - Indirect Expression",
            "Yes - Content opposes someone else",
            "No - Expression is not emotional/forceful",
        ],
    );
    let report = session.reconcile("r1").unwrap();
    assert_eq!(report.completed, 1);

    let entry = session.log().get(&message_id, "r1").unwrap();
    assert_eq!(entry.status, AllocationStatus::Done);
    assert!(entry.last_updated_time >= allocated_at);
    assert_eq!(
        entry.ratings.get(Metric::OiContent),
        Some("Yes - Content opposes someone else")
    );

    // With nothing outstanding, the rater can be scheduled again.
    assert!(matches!(
        session.schedule("r1", 1).unwrap(),
        ScheduleOutcome::Allocated(batch) if batch.messages.len() == 1
    ));
}

#[test]
fn identical_ratings_agree_perfectly() {
    let sheets = InMemorySheets::with_sheets(["sheet-r1", "sheet-r2"]);
    let mut session = build_session(&sheets, build_corpus(4, 5));
    session.schedule("r1", 1).unwrap();
    session.schedule("r2", 1).unwrap();

    let answers = [
        [
            "Yes - Direct Content",
            "Yes - Direct Expression",
            "Yes - Content opposes someone else",
            "Yes - Expression is emotional/forceful",
        ],
        [
            "No - Indirect Content",
            "No - Indirect Expression",
            "No - Content does not oppose anyone",
            "No - Expression is not emotional/forceful",
        ],
        [
            "Neutral - Content contains no opinion",
            "Yes - Direct Expression",
            "No - Content does not oppose anyone",
            "Yes - Expression is emotional/forceful",
        ],
        [
            "Yes - Direct Content",
            "No - Indirect Expression",
            "Yes - Content opposes someone else",
            "No - Expression is not emotional/forceful",
        ],
        [
            "No - Indirect Content",
            "Yes - Direct Expression",
            "No - Content does not oppose anyone",
            "No - Expression is not emotional/forceful",
        ],
    ];
    for (offset, labels) in answers.iter().enumerate() {
        fill(&sheets, "sheet-r1", 3 + offset as u32, *labels);
        fill(&sheets, "sheet-r2", 3 + offset as u32, *labels);
    }

    let raters = vec!["r1".to_string(), "r2".to_string()];
    let reports = session.agreement_summary(&raters).unwrap();
    assert_eq!(reports.len(), 4);
    for report in reports {
        assert_eq!(report.questions, 5);
        assert_eq!((report.first_row, report.last_row), (3, 7));
        assert_eq!(report.observed, Some(1.0));
        assert_eq!(report.unanimous, Some(1.0));
        assert!((report.fleiss_kappa.unwrap() - 1.0).abs() < 1e-12);
        assert!((report.cohen_kappa.unwrap() - 1.0).abs() < 1e-12);
    }
    assert!(
        session
            .find_disagreements(Metric::DirectnessContent, &raters)
            .unwrap()
            .is_empty()
    );
}

#[test]
fn disagreements_resolve_to_messages() {
    let sheets = InMemorySheets::with_sheets(["sheet-r1", "sheet-r2"]);
    let mut session = build_session(&sheets, build_corpus(2, 3));
    session.schedule("r1", 1).unwrap();
    session.schedule("r2", 1).unwrap();
    let agree = [
        "Yes - Direct Content",
        "Yes - Direct Expression",
        "Yes - Content opposes someone else",
        "Yes - Expression is emotional/forceful",
    ];
    let differ = [
        "No - Indirect Content",
        "Yes - Direct Expression",
        "Yes - Content opposes someone else",
        "Yes - Expression is emotional/forceful",
    ];
    fill(&sheets, "sheet-r1", 3, agree);
    fill(&sheets, "sheet-r2", 3, agree);
    fill(&sheets, "sheet-r1", 4, agree);
    fill(&sheets, "sheet-r2", 4, differ);

    let raters = vec!["r1".to_string(), "r2".to_string()];
    let disagreements = session
        .find_disagreements(Metric::DirectnessContent, &raters)
        .unwrap();
    assert_eq!(disagreements.len(), 1);
    let row = &disagreements[0];
    assert_eq!(row.row, 4);
    let expected_id = session.order().ids()[0].clone() + "_msg_1";
    assert_eq!(row.message_id, expected_id);
    assert!(row.text.ends_with("message 1"));
    assert_eq!(row.labels[1].1, "No - Indirect Content");

    let report = session
        .compute_agreement(Metric::DirectnessContent, &raters)
        .unwrap();
    assert_eq!(report.questions, 2);
    assert_eq!(report.observed, Some(0.5));
}

#[test]
fn agreement_needs_a_shared_rated_row() {
    let sheets = InMemorySheets::with_sheets(["sheet-r1", "sheet-r2"]);
    let mut session = build_session(&sheets, build_corpus(2, 2));
    session.schedule("r1", 1).unwrap();
    session.schedule("r2", 1).unwrap();
    fill(
        &sheets,
        "sheet-r1",
        3,
        [
            "Yes - Direct Content",
            "Yes - Direct Expression",
            "Yes - Content opposes someone else",
            "Yes - Expression is emotional/forceful",
        ],
    );

    let raters = vec!["r1".to_string(), "r2".to_string()];
    let err = session
        .compute_agreement(Metric::OiExpression, &raters)
        .unwrap_err();
    assert!(matches!(err, LedgerError::NotEnoughRatings(_)));

    let err = session
        .compute_agreement(Metric::OiExpression, &["r1".to_string(), "ghost".to_string()])
        .unwrap_err();
    assert!(matches!(err, LedgerError::UnknownRater(rater) if rater == "ghost"));
}
