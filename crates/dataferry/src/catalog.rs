//! Named extraction queries and the migration job that maps them to tables
//!
//! The queries run against the MySQL database filled by the raw-data
//! ingest. `email_domain` holds the full email address.

/// A fixed extraction query with a stable name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NamedQuery {
    /// Stable name
    pub name: &'static str,
    /// SQL text
    pub sql: &'static str,
}

/// Sessions per email and week of joining
pub const WEEKLY_ACTIVITY: NamedQuery = NamedQuery {
    name: "weekly_activity",
    sql: "SELECT \
              user.email AS email_domain, \
              WEEK(STR_TO_DATE(space_attendee.joinDate, '%m/%d/%Y %H:%i')) AS week_number, \
              COUNT(space_attendee.spaceSessionId) AS weekly_activity \
          FROM user \
          JOIN space_attendee ON user.ID = space_attendee.userId \
          GROUP BY email_domain, week_number;",
};

/// Sessions per email overall
pub const TOTAL_ACTIVITY: NamedQuery = NamedQuery {
    name: "total_activity",
    sql: "SELECT \
              user.email AS email_domain, \
              COUNT(spaceSessionId) AS total_activity \
          FROM user \
          JOIN space_attendee ON user.ID = space_attendee.userId \
          GROUP BY email_domain;",
};

/// Sessions with at least two participants lasting at least five minutes
pub const FILTERED_SESSION: NamedQuery = NamedQuery {
    name: "filtered_session",
    sql: "SELECT * \
          FROM space_session_info \
          WHERE number_of_participants >= 2 AND duration >= 5;",
};

/// Every named query, in job order
pub const ALL_QUERIES: [NamedQuery; 3] = [WEEKLY_ACTIVITY, TOTAL_ACTIVITY, FILTERED_SESSION];

/// Ordered `(destination table, query)` pairs
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationJob {
    entries: Vec<(String, NamedQuery)>,
}

impl MigrationJob {
    /// Empty job
    pub fn new() -> Self {
        Self::default()
    }

    /// The three standard tables, each named after its query
    pub fn standard() -> Self {
        ALL_QUERIES
            .iter()
            .fold(Self::new(), |job, q| job.with(q.name, *q))
    }

    /// Append a pair (builder pattern)
    pub fn with(mut self, table: impl Into<String>, query: NamedQuery) -> Self {
        self.push(table, query);
        self
    }

    /// Append a pair
    pub fn push(&mut self, table: impl Into<String>, query: NamedQuery) {
        self.entries.push((table.into(), query));
    }

    /// Pairs in declaration order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &NamedQuery)> {
        self.entries.iter().map(|(t, q)| (t.as_str(), q))
    }

    /// Number of pairs
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the job has no pairs
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_job_order() {
        let job = MigrationJob::standard();
        let tables: Vec<&str> = job.iter().map(|(t, _)| t).collect();
        assert_eq!(tables, vec!["weekly_activity", "total_activity", "filtered_session"]);

        for (table, query) in job.iter() {
            assert_eq!(table, query.name);
        }
    }

    #[test]
    fn test_query_text() {
        assert!(WEEKLY_ACTIVITY
            .sql
            .contains("WEEK(STR_TO_DATE(space_attendee.joinDate, '%m/%d/%Y %H:%i')) AS week_number"));
        assert!(WEEKLY_ACTIVITY.sql.contains("GROUP BY email_domain, week_number"));
        assert!(TOTAL_ACTIVITY.sql.contains("COUNT(spaceSessionId) AS total_activity"));
        assert!(FILTERED_SESSION
            .sql
            .contains("WHERE number_of_participants >= 2 AND duration >= 5"));
    }

    #[test]
    fn test_custom_job() {
        let job = MigrationJob::new().with("copy", FILTERED_SESSION);
        assert_eq!(job.len(), 1);
        assert_eq!(job.iter().next(), Some(("copy", &FILTERED_SESSION)));
    }
}
