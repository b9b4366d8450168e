//! Progress reporting while a DML operation runs.

use std::fmt::Debug;

use observability_deps::tracing::info;

use crate::{metadata::EntityMetadata, operation::OperationNames};

/// Receives progress updates. Called concurrently from every worker.
pub trait ProgressReporter: Debug + Send + Sync + 'static {
    /// `progress` is the fraction of rows handed to the server so far, in `0.0..=1.0`
    fn report(&self, progress: f64, message: &str);
}

/// Discards all progress
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _progress: f64, _message: &str) {}
}

/// Writes progress to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogProgress;

impl ProgressReporter for LogProgress {
    fn report(&self, progress: f64, message: &str) {
        info!(progress, "{message}");
    }
}

/// Formats progress messages for one operation on one entity
#[derive(Debug, Clone, Copy)]
pub(crate) struct ProgressMessages<'a> {
    pub(crate) names: OperationNames,
    pub(crate) entity: &'a EntityMetadata,
    pub(crate) total: usize,
}

impl ProgressMessages<'_> {
    /// e.g. `Deleting 5 of 250 accounts (2%)...` or, with several workers,
    /// `Deleting 3-5 of 250 accounts (2%, 3 threads)...`
    ///
    /// The percentage is of the `done` rows, matching [`Self::fraction`].
    pub(crate) fn single(&self, done: usize, in_progress: usize, threads: usize) -> String {
        let percent = percent(done, self.total);
        let plural = self.entity.display_name_for(self.total);

        if threads < 2 {
            format!(
                "{} {} of {} {plural} ({percent}%)...",
                self.names.in_progress_uppercase,
                thousands(in_progress),
                thousands(self.total),
            )
        } else {
            let first = (in_progress + 1).saturating_sub(threads).max(1);
            format!(
                "{} {}-{} of {} {plural} ({percent}%, {threads} threads)...",
                self.names.in_progress_uppercase,
                thousands(first),
                thousands(in_progress),
                thousands(self.total),
            )
        }
    }

    /// e.g. `Deleting accounts 1 - 50 of 250...` or, with several workers,
    /// `Deleting accounts 51 - 100 of 250 (4 threads)...`
    pub(crate) fn batch(&self, first: usize, last: usize, threads: usize) -> String {
        let threads = if threads < 2 {
            String::new()
        } else {
            format!(" ({threads} threads)")
        };

        format!(
            "{} {} {} - {} of {}{threads}...",
            self.names.in_progress_uppercase,
            self.entity.display_name_for(self.total),
            thousands(first),
            thousands(last),
            thousands(self.total),
        )
    }

    pub(crate) fn fraction(&self, done: usize) -> f64 {
        if self.total == 0 {
            1.0
        } else {
            done as f64 / self.total as f64
        }
    }

    /// e.g. `stopped deleting accounts after 7 of 250`
    pub(crate) fn stopped(&self, done: usize) -> String {
        format!(
            "stopped {} {} after {} of {}",
            self.names.in_progress_lowercase,
            self.entity.display_name_for(self.total),
            thousands(done),
            thousands(self.total),
        )
    }

    /// e.g. `7 accounts deleted`
    pub(crate) fn partial(&self, count: usize) -> String {
        format!(
            "{} {} {}",
            thousands(count),
            self.entity.display_name_for(count),
            self.names.completed_lowercase
        )
    }

    /// e.g. `(250 accounts deleted)`
    pub(crate) fn completed(&self, count: usize) -> String {
        format!("({})", self.partial(count))
    }
}

fn percent(done: usize, total: usize) -> u64 {
    if total == 0 {
        return 100;
    }
    (done as f64 * 100.0 / total as f64).round() as u64
}

/// Format `n` with `,` between groups of three digits
pub fn thousands(n: usize) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn messages(entity: &EntityMetadata, total: usize) -> ProgressMessages<'_> {
        ProgressMessages {
            names: OperationNames {
                in_progress_uppercase: "Deleting",
                in_progress_lowercase: "deleting",
                completed_lowercase: "deleted",
            },
            entity,
            total,
        }
    }

    #[test]
    fn thousands_separators() {
        assert_eq!(thousands(0), "0");
        assert_eq!(thousands(999), "999");
        assert_eq!(thousands(1000), "1,000");
        assert_eq!(thousands(1234567), "1,234,567");
    }

    #[test]
    fn single_request_messages() {
        let account =
            EntityMetadata::new("account", "accountid").with_display_names("account", "accounts");
        let m = messages(&account, 250);

        assert_eq!(m.single(4, 5, 1), "Deleting 5 of 250 accounts (2%)...");
        assert_eq!(
            m.single(2, 5, 3),
            "Deleting 3-5 of 250 accounts (1%, 3 threads)..."
        );
        assert_eq!(
            m.single(0, 1, 4),
            "Deleting 1-1 of 250 accounts (0%, 4 threads)..."
        );
        assert_eq!(
            messages(&account, 12_000).single(1_500, 1_560, 1),
            "Deleting 1,560 of 12,000 accounts (13%)..."
        );
    }

    #[test]
    fn percentage_follows_the_reported_fraction() {
        let account =
            EntityMetadata::new("account", "accountid").with_display_names("account", "accounts");
        let m = messages(&account, 4);

        // three requests in flight, none answered yet
        assert_eq!(m.fraction(0), 0.0);
        assert_eq!(m.single(0, 3, 3), "Deleting 1-3 of 4 accounts (0%, 3 threads)...");

        assert_eq!(m.fraction(2), 0.5);
        assert_eq!(m.single(2, 4, 2), "Deleting 3-4 of 4 accounts (50%, 2 threads)...");
    }

    #[test]
    fn batch_messages() {
        let account =
            EntityMetadata::new("account", "accountid").with_display_names("account", "accounts");
        let m = messages(&account, 250);

        assert_eq!(m.batch(1, 50, 1), "Deleting accounts 1 - 50 of 250...");
        assert_eq!(
            m.batch(51, 100, 4),
            "Deleting accounts 51 - 100 of 250 (4 threads)..."
        );
    }

    #[test]
    fn result_messages_use_display_names() {
        let account =
            EntityMetadata::new("account", "accountid").with_display_names("account", "accounts");
        let m = messages(&account, 250);

        assert_eq!(m.completed(250), "(250 accounts deleted)");
        assert_eq!(m.completed(1), "(1 account deleted)");
        assert_eq!(m.partial(7), "7 accounts deleted");
        assert_eq!(m.stopped(7), "stopped deleting accounts after 7 of 250");
        assert_eq!(
            messages(&account, 1).stopped(0),
            "stopped deleting account after 0 of 1"
        );
    }
}
