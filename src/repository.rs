//! In-memory store of student term trees and term aggregation trees.
//!
//! There is no process-wide registry: a [Repository] is an ordinary value
//! owned by the caller and passed to whoever needs it (e.g.
//! [crate::ReceiptIssuer]). Write access, and so the single-writer discipline
//! on each term's aggregation tree, follows Rust ownership.

use log::{debug, info};
use logging_timer::{finish, timer, Level};
use primitive_types::H256;
use rayon::prelude::*;

use std::collections::HashMap;

use crate::{
    aggregation::{AggregationError, PublishedRoot, TermAggregationTree},
    anchor::{Anchor, AnchorError, AnchorReceipt},
    completion::{CourseCompletion, StudentKey, TermId},
    max_thread_count::MaxThreadCount,
    student_tree::{StudentTermTree, StudentTreeError},
    utils::LogOnErr,
};

// -------------------------------------------------------------------------------------------------
// Term entry.

/// Everything stored for one term.
#[derive(Debug, Clone)]
pub struct TermEntry {
    aggregation: TermAggregationTree,
    students: HashMap<StudentKey, StudentTermTree>,
}

impl TermEntry {
    fn new(term: TermId) -> Self {
        TermEntry {
            aggregation: TermAggregationTree::new(term),
            students: HashMap::new(),
        }
    }

    pub fn aggregation(&self) -> &TermAggregationTree {
        &self.aggregation
    }

    pub fn student_tree(&self, student: &StudentKey) -> Option<&StudentTermTree> {
        self.students.get(student)
    }

    pub fn students(&self) -> impl Iterator<Item = &StudentKey> {
        self.students.keys()
    }
}

// -------------------------------------------------------------------------------------------------
// Repository.

#[derive(Debug, Clone, Default)]
pub struct Repository {
    terms: HashMap<TermId, TermEntry>,
    max_thread_count: MaxThreadCount,
}

impl Repository {
    pub fn new(max_thread_count: MaxThreadCount) -> Self {
        Repository {
            terms: HashMap::new(),
            max_thread_count,
        }
    }

    /// Build every student term tree of a new term, aggregate them and
    /// publish the term, stamping the current time.
    ///
    /// See [Repository::build_term_at].
    pub fn build_term(
        &mut self,
        term: TermId,
        completions_by_student: HashMap<StudentKey, Vec<CourseCompletion>>,
    ) -> Result<PublishedRoot, RepositoryError> {
        self.build_term_inner(term, completions_by_student, None)
    }

    /// Build every student term tree of a new term, aggregate them and
    /// publish the term with the given publication time.
    ///
    /// Student trees are built in parallel on a pool of
    /// [MaxThreadCount] threads; insertion and publication then happen on the
    /// calling thread. Nothing is stored unless every tree builds and the
    /// term publishes.
    ///
    /// An error is returned if:
    /// 1. The term already exists in the repository.
    /// 2. Any student term tree fails to build.
    /// 3. There are no students.
    pub fn build_term_at(
        &mut self,
        term: TermId,
        completions_by_student: HashMap<StudentKey, Vec<CourseCompletion>>,
        published_at: u64,
    ) -> Result<PublishedRoot, RepositoryError> {
        self.build_term_inner(term, completions_by_student, Some(published_at))
    }

    fn build_term_inner(
        &mut self,
        term: TermId,
        completions_by_student: HashMap<StudentKey, Vec<CourseCompletion>>,
        published_at: Option<u64>,
    ) -> Result<PublishedRoot, RepositoryError> {
        if self.terms.contains_key(&term) {
            return Err(RepositoryError::TermExists { term });
        }

        info!(
            "\nBuilding term {} with the following configuration:\n \
             - number of students: {}\n \
             - max thread count: {}",
            term,
            completions_by_student.len(),
            self.max_thread_count.as_u8()
        );

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.max_thread_count.as_u8() as usize)
            .build()
            .map_err(|err| RepositoryError::ThreadPool(err.to_string()))?;

        let tmr = timer!(Level::Debug; "Student term tree construction");

        let mut trees = pool
            .install(|| {
                completions_by_student
                    .into_par_iter()
                    .map(|(student, completions)| {
                        StudentTermTree::build(student.clone(), term.clone(), completions)
                            .map_err(|source| RepositoryError::StudentTree { student, source })
                    })
                    .collect::<Result<Vec<StudentTermTree>, RepositoryError>>()
            })
            .log_on_err()?;

        finish!(tmr, "Built {} student term trees", trees.len());

        // Deterministic insertion order keeps the logs reproducible.
        trees.sort_by(|a, b| a.student().cmp(b.student()));

        let mut entry = TermEntry::new(term.clone());
        for tree in trees {
            entry
                .aggregation
                .insert_student(tree.student(), *tree.root())?;
            entry.students.insert(tree.student().clone(), tree);
        }

        match published_at {
            Some(published_at) => entry.aggregation.publish_at(published_at)?,
            None => entry.aggregation.publish()?,
        };

        let published = entry
            .aggregation
            .published_root()
            .copied()
            .ok_or(RepositoryError::Aggregation(AggregationError::Unpublished {
                term: term.clone(),
            }))?;

        self.terms.insert(term, entry);

        Ok(published)
    }

    /// Add (or correct) one student's tree for its term.
    ///
    /// The term is created if it does not exist yet. If the term has already
    /// been published, the change stays pending until the next
    /// [Repository::publish_term].
    pub fn add_student_tree(&mut self, tree: StudentTermTree) -> Result<(), RepositoryError> {
        let entry = self
            .terms
            .entry(tree.term().clone())
            .or_insert_with(|| TermEntry::new(tree.term().clone()));

        entry
            .aggregation
            .insert_student(tree.student(), *tree.root())?;

        debug!(
            "Stored student term tree for student {} in term {}",
            tree.student(),
            tree.term()
        );

        entry.students.insert(tree.student().clone(), tree);
        Ok(())
    }

    /// Publish `term` and forward the new root to `anchor`.
    pub fn publish_term(
        &mut self,
        term: &TermId,
        anchor: &dyn Anchor,
    ) -> Result<(PublishedRoot, AnchorReceipt), RepositoryError> {
        self.publish_term_inner(term, anchor, None)
    }

    /// Like [Repository::publish_term] with an explicit publication time.
    pub fn publish_term_at(
        &mut self,
        term: &TermId,
        anchor: &dyn Anchor,
        published_at: u64,
    ) -> Result<(PublishedRoot, AnchorReceipt), RepositoryError> {
        self.publish_term_inner(term, anchor, Some(published_at))
    }

    fn publish_term_inner(
        &mut self,
        term: &TermId,
        anchor: &dyn Anchor,
        published_at: Option<u64>,
    ) -> Result<(PublishedRoot, AnchorReceipt), RepositoryError> {
        let aggregation = self
            .aggregation_mut(term)
            .ok_or_else(|| RepositoryError::UnknownTerm { term: term.clone() })?;

        let root: H256 = match published_at {
            Some(published_at) => aggregation.publish_at(published_at)?,
            None => aggregation.publish()?,
        };

        let published = aggregation
            .published_root()
            .copied()
            .ok_or(RepositoryError::Aggregation(AggregationError::Unpublished {
                term: term.clone(),
            }))?;

        let receipt = anchor
            .publish(root, term, published.total_students)
            .log_on_err()?;

        Ok((published, receipt))
    }
}

// -------------------------------------------------------------------------------------------------
// Accessor methods.

impl Repository {
    pub fn term(&self, term: &TermId) -> Option<&TermEntry> {
        self.terms.get(term)
    }

    pub fn terms(&self) -> impl Iterator<Item = &TermId> {
        self.terms.keys()
    }

    pub fn student_tree(&self, term: &TermId, student: &StudentKey) -> Option<&StudentTermTree> {
        self.terms.get(term).and_then(|entry| entry.student_tree(student))
    }

    pub fn aggregation(&self, term: &TermId) -> Option<&TermAggregationTree> {
        self.terms.get(term).map(|entry| &entry.aggregation)
    }

    pub fn aggregation_mut(&mut self, term: &TermId) -> Option<&mut TermAggregationTree> {
        self.terms.get_mut(term).map(|entry| &mut entry.aggregation)
    }

    pub fn max_thread_count(&self) -> MaxThreadCount {
        self.max_thread_count
    }
}

// -------------------------------------------------------------------------------------------------
// Errors.

/// Errors encountered when handling a [Repository].
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum RepositoryError {
    #[error("Term {term} already exists")]
    TermExists { term: TermId },
    #[error("Term {term} not found")]
    UnknownTerm { term: TermId },
    #[error("Building the student term tree for {student} failed")]
    StudentTree {
        student: StudentKey,
        source: StudentTreeError,
    },
    #[error("Aggregation tree error")]
    Aggregation(#[from] AggregationError),
    #[error("Anchor error")]
    Anchor(#[from] AnchorError),
    #[error("Thread pool could not be created: {0}")]
    ThreadPool(String),
}

// -------------------------------------------------------------------------------------------------
// Unit tests.

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anchor::InMemoryAnchor;
    use crate::completion::{CourseId, IssuerId, Timestamps};
    use crate::utils::test_utils::assert_err;
    use std::str::FromStr;

    fn term() -> TermId {
        TermId::from_str("T1").unwrap()
    }

    fn student(s: &str) -> StudentKey {
        StudentKey::from_str(s).unwrap()
    }

    fn completion(s: &str, course: &str, issued: u64) -> CourseCompletion {
        CourseCompletion::new(
            IssuerId::from_str("uni").unwrap(),
            student(s),
            term(),
            CourseId::from_str(course).unwrap(),
            1,
            Timestamps {
                started: issued - 30,
                completed: issued - 20,
                assessed: issued - 10,
                issued,
            },
            "A".to_owned(),
            4,
        )
    }

    fn input(n: usize) -> HashMap<StudentKey, Vec<CourseCompletion>> {
        (0..n)
            .map(|i| {
                let s = format!("s{}", i);
                (
                    student(&s),
                    vec![completion(&s, "C1", 1000), completion(&s, "C2", 1100)],
                )
            })
            .collect()
    }

    #[test]
    fn build_term_publishes_every_student() {
        let mut repo = Repository::new(MaxThreadCount::from(2));
        let published = repo.build_term_at(term(), input(12), 5000).unwrap();

        assert_eq!(published.version, 1);
        assert_eq!(published.total_students, 12);
        assert_eq!(published.published_at, 5000);

        let aggregation = repo.aggregation(&term()).unwrap();
        for i in 0..12 {
            let s = student(&format!("s{}", i));
            let tree = repo.student_tree(&term(), &s).unwrap();
            assert_eq!(aggregation.value_for(&s), Some(tree.root()));
        }
    }

    #[test]
    fn thread_count_does_not_change_root() {
        let mut single = Repository::new(MaxThreadCount::from(1));
        let mut many = Repository::new(MaxThreadCount::from(4));
        let a = single.build_term_at(term(), input(9), 1).unwrap();
        let b = many.build_term_at(term(), input(9), 1).unwrap();
        assert_eq!(a.root, b.root);
    }

    #[test]
    fn failing_student_aborts_the_term() {
        let mut repo = Repository::default();
        let mut data = input(3);
        data.insert(student("empty"), vec![]);

        assert_err!(
            repo.build_term_at(term(), data, 1),
            Err(RepositoryError::StudentTree {
                source: StudentTreeError::EmptyInput { .. },
                ..
            })
        );
        assert!(repo.aggregation(&term()).is_none());
    }

    #[test]
    fn no_students_is_an_empty_tree() {
        let mut repo = Repository::default();
        assert_err!(
            repo.build_term_at(term(), HashMap::new(), 1),
            Err(RepositoryError::Aggregation(AggregationError::EmptyTree { .. }))
        );
    }

    #[test]
    fn term_cannot_be_built_twice() {
        let mut repo = Repository::default();
        repo.build_term_at(term(), input(2), 1).unwrap();
        assert_err!(
            repo.build_term_at(term(), input(2), 2),
            Err(RepositoryError::TermExists { .. })
        );
    }

    #[test]
    fn correction_is_published_and_anchored() {
        let mut repo = Repository::default();
        let anchor = InMemoryAnchor::new();
        let first = repo.build_term_at(term(), input(3), 1).unwrap();

        let corrected = StudentTermTree::build(
            student("s1"),
            term(),
            vec![completion("s1", "C1", 1000), completion("s1", "C3", 1200)],
        )
        .unwrap();
        repo.add_student_tree(corrected).unwrap();
        assert!(repo.aggregation(&term()).unwrap().has_pending_changes());

        let (published, receipt) = repo.publish_term_at(&term(), &anchor, 2).unwrap();
        assert_eq!(published.version, 2);
        assert_ne!(published.root, first.root);
        assert!(!receipt.tx_id.is_empty());
        assert_eq!(anchor.query_latest(&term()).unwrap().root, published.root);
    }

    #[test]
    fn publishing_unknown_term_fails() {
        let mut repo = Repository::default();
        let anchor = InMemoryAnchor::new();
        assert_err!(
            repo.publish_term(&term(), &anchor),
            Err(RepositoryError::UnknownTerm { .. })
        );
    }

    #[test]
    fn offline_anchor_is_reported() {
        let mut repo = Repository::default();
        let anchor = InMemoryAnchor::new();
        anchor.set_offline(true);
        repo.add_student_tree(
            StudentTermTree::build(student("a"), term(), vec![completion("a", "C1", 10_000)])
                .unwrap(),
        )
        .unwrap();

        assert_err!(
            repo.publish_term_at(&term(), &anchor, 20_000),
            Err(RepositoryError::Anchor(AnchorError::Unreachable { .. }))
        );
    }
}
