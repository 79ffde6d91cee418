//! Example of a full credential workflow.
//!
//! 1. Build & publish a term
//! 2. Issue a receipt disclosing some of a student's courses
//! 3. Verify the receipt against the anchored term root
//! 4. Correct a student's record and republish

use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;

extern crate credacc;

use credacc::utils::LogOnErrUnwrap;

fn main() {
    credacc::utils::activate_logging(log::LevelFilter::Debug);

    // =========================================================================
    // Term building & publication.

    let term = credacc::TermId::from_str("2024-fall").unwrap();
    let anchor = credacc::InMemoryAnchor::new();

    // Both construction methods give an empty repository.
    let mut repository = build_repository_using_config_file();
    assert_eq!(
        build_repository_using_config_builder().terms().count(),
        repository.terms().count()
    );

    repository
        .build_term(term.clone(), sample_completions(&term))
        .log_on_err_unwrap();
    let (published, anchor_receipt) = repository
        .publish_term(&term, &anchor)
        .log_on_err_unwrap();

    println!(
        "Term {} published with root {:?} ({} students), ledger tx {}",
        term, published.root, published.total_students, anchor_receipt.tx_id
    );

    // =========================================================================
    // Receipt issuing & verification.

    let alice = credacc::StudentKey::from_str("alice@example.com").unwrap();
    simple_receipt_issuing_and_verification(&repository, &anchor, &alice, &term);
    receipt_file_round_trip(&repository, &anchor, &alice, &term);

    // =========================================================================
    // Record correction.

    correct_record_and_republish(&mut repository, &anchor, &alice, &term);
}

/// Example on how to construct a [credacc::Repository] from a config file.
///
/// This is also an example usage of [credacc][utils][LogOnErrUnwrap].
pub fn build_repository_using_config_file() -> credacc::Repository {
    let src_dir = env!("CARGO_MANIFEST_DIR");
    let resources_dir = Path::new(&src_dir).join("demos");
    let config_file = resources_dir.join("repository_config_example.toml");

    credacc::RepositoryConfig::deserialize(config_file)
        .log_on_err_unwrap()
        .parse()
}

/// Example on how to construct a [credacc::Repository] via the config builder.
pub fn build_repository_using_config_builder() -> credacc::Repository {
    credacc::RepositoryConfigBuilder::default()
        .max_thread_count(credacc::MaxThreadCount::from(8u8))
        .build()
        .parse()
}

/// Issue a receipt that discloses a single course and verify it.
pub fn simple_receipt_issuing_and_verification(
    repository: &credacc::Repository,
    anchor: &credacc::InMemoryAnchor,
    student: &credacc::StudentKey,
    term: &credacc::TermId,
) {
    let course = credacc::CourseId::from_str("MATH101").unwrap();

    let receipt = credacc::ReceiptIssuer::new(repository)
        .issue(student, term, &[course])
        .unwrap();

    credacc::verify_receipt_with_anchor(&receipt, anchor).unwrap();
}

/// Receipts are exchanged as documents; json & bincode are both supported.
pub fn receipt_file_round_trip(
    repository: &credacc::Repository,
    anchor: &credacc::InMemoryAnchor,
    student: &credacc::StudentKey,
    term: &credacc::TermId,
) {
    // An empty course list discloses every course.
    let receipt = credacc::ReceiptIssuer::new(repository)
        .issue(student, term, &[])
        .unwrap();

    let dir = std::env::temp_dir().join("credacc_demo");
    std::fs::create_dir_all(&dir).unwrap();

    for name in ["receipt.json", "receipt.receipt"] {
        let path = dir.join(name);
        receipt.serialize(path.clone()).unwrap();
        let read_back = credacc::VerificationReceipt::deserialize(path).unwrap();
        credacc::verify_receipt_with_anchor(&read_back, anchor).unwrap();
    }
}

/// A correction supersedes the published root; receipts issued before it
/// no longer match the anchored root.
pub fn correct_record_and_republish(
    repository: &mut credacc::Repository,
    anchor: &credacc::InMemoryAnchor,
    student: &credacc::StudentKey,
    term: &credacc::TermId,
) {
    let old_receipt = credacc::ReceiptIssuer::new(repository)
        .issue(student, term, &[])
        .unwrap();

    let mut completions = repository
        .student_tree(term, student)
        .unwrap()
        .completions()
        .to_vec();
    completions.push(completion(student, term, "HIST210", 2, 1_700_000_000));

    let corrected =
        credacc::StudentTermTree::build(student.clone(), term.clone(), completions).unwrap();
    repository.add_student_tree(corrected).unwrap();
    let (published, _) = repository.publish_term(term, anchor).unwrap();
    assert_eq!(published.version, 2);

    match credacc::verify_receipt_with_anchor(&old_receipt, anchor) {
        Err(credacc::ReceiptError::Violations(violations)) => println!("{}", violations),
        other => panic!("Expected the old receipt to be stale, got {:?}", other),
    }
}

fn sample_completions(
    term: &credacc::TermId,
) -> HashMap<credacc::StudentKey, Vec<credacc::CourseCompletion>> {
    let courses = ["MATH101", "PHYS101", "HIST210"];
    let mut completions = HashMap::new();

    for i in 0..20u64 {
        let student = credacc::StudentKey::from_str(&format!("student{}@example.com", i)).unwrap();
        let list = courses
            .iter()
            .map(|course| completion(&student, term, course, 1, 1_690_000_000 + i * 3600))
            .collect();
        completions.insert(student, list);
    }

    let alice = credacc::StudentKey::from_str("alice@example.com").unwrap();
    let list = courses
        .iter()
        .map(|course| completion(&alice, term, course, 1, 1_690_000_000))
        .collect();
    completions.insert(alice, list);

    completions
}

fn completion(
    student: &credacc::StudentKey,
    term: &credacc::TermId,
    course: &str,
    attempt: u32,
    issued: u64,
) -> credacc::CourseCompletion {
    credacc::CourseCompletionBuilder::default()
        .issuer(credacc::IssuerId::from_str("example-university").unwrap())
        .student(student.clone())
        .term(term.clone())
        .course(credacc::CourseId::from_str(course).unwrap())
        .attempt(attempt)
        .timestamps(credacc::Timestamps {
            started: issued - 100 * 86_400,
            completed: issued - 10 * 86_400,
            assessed: issued - 86_400,
            issued,
        })
        .grade("B+")
        .credits(4u16)
        .build()
        .unwrap()
}
