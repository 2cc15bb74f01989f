/// Database module for the occupancy index, room catalog and enrollment roster
mod types;

pub use types::{BulkReport, FailedDoc, IndexError, OccupancyQuery};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::{BTreeSet, HashSet};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

use crate::occupancy::{section_bit, EnrollmentBatch, EnrollmentRecord, OccupancyRecord, WeekMask};

const SCHEMA_SQL: &str = include_str!("../../../../sql/init_roomfinder.sql");

/// Searchable store of occupancy documents and the room catalog.
#[async_trait]
pub trait OccupancyIndex: Send + Sync {
    /// Upserts documents by their deterministic id.
    async fn bulk_upsert(&self, docs: &[OccupancyRecord]) -> Result<BulkReport, IndexError>;

    /// Removes every document whose (year, semester) differs from the given term.
    async fn delete_other_terms(&self, year: &str, semester: &str) -> Result<usize, IndexError>;

    async fn count_term(&self, year: &str, semester: &str) -> Result<usize, IndexError>;

    /// Distinct rooms occupied at the queried week/day/section.
    async fn occupied_rooms(&self, query: &OccupancyQuery) -> Result<BTreeSet<String>, IndexError>;

    /// Known rooms starting with `prefix`, sorted.
    async fn catalog(&self, prefix: &str) -> Result<Vec<String>, IndexError>;
}

/// Paginated read access to the enrollment roster.
#[async_trait]
pub trait EnrollmentSource: Send + Sync {
    /// Returns page `page` (1-based) of `page_size` rows plus the term's total.
    async fn get_batch(
        &self,
        year: &str,
        semester: &str,
        page: u32,
        page_size: u32,
    ) -> Result<EnrollmentBatch, IndexError>;
}

pub struct CampusDb {
    db: Mutex<Connection>,
}

impl CampusDb {
    /// Opens (or creates) the database file and initializes the schema.
    pub fn open(db_path: &str) -> Result<Self, IndexError> {
        let conn = Connection::open(db_path)?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, IndexError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, IndexError> {
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self {
            db: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, IndexError> {
        self.db.lock().map_err(|_| IndexError::Poisoned)
    }

    /// Adds rooms to the catalog; existing rooms are left alone.
    pub fn register_rooms<I, S>(&self, rooms: I) -> Result<usize, IndexError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut db = self.conn()?;
        let tx = db.transaction()?;
        let mut added = 0;
        {
            let mut stmt = tx.prepare_cached("INSERT OR IGNORE INTO rooms (room) VALUES (?1)")?;
            for room in rooms {
                let room = room.as_ref().trim();
                if !room.is_empty() {
                    added += stmt.execute([room])?;
                }
            }
        }
        tx.commit()?;
        Ok(added)
    }

    /// Inserts or replaces enrollment rows (keyed by their id).
    pub fn insert_enrollments(&self, records: &[EnrollmentRecord]) -> Result<usize, IndexError> {
        let mut db = self.conn()?;
        let tx = db.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT OR REPLACE INTO enrollments (
                    id, year, semester, day, teacher, room, class_when, week_mask, class_name, credit
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            )?;
            for r in records {
                stmt.execute(params![
                    r.id,
                    r.year,
                    r.semester,
                    r.day,
                    r.teacher,
                    r.room,
                    r.class_when,
                    r.week_mask,
                    r.class_name,
                    r.credit,
                ])?;
            }
        }
        tx.commit()?;
        Ok(records.len())
    }

    /// All documents for a term, ordered by room then day.
    pub fn documents(&self, year: &str, semester: &str) -> Result<Vec<OccupancyRecord>, IndexError> {
        let db = self.conn()?;
        let mut stmt = db.prepare(
            "SELECT year, semester, room, day, weeks, sections
             FROM occupancy
             WHERE year = ?1 AND semester = ?2
             ORDER BY room, day, doc_id",
        )?;

        let rows = stmt
            .query_map([year, semester], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, u8>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(year, semester, room, day, weeks, sections)| -> Result<_, IndexError> {
                Ok(OccupancyRecord {
                    year,
                    semester,
                    room,
                    day,
                    weeks: serde_json::from_str(&weeks)?,
                    sections: serde_json::from_str(&sections)?,
                })
            })
            .collect()
    }

    /// Looks up a single document by id.
    pub fn has_document(&self, doc_id: &str) -> Result<bool, IndexError> {
        let db = self.conn()?;
        let found = db
            .query_row(
                "SELECT 1 FROM occupancy WHERE doc_id = ?1",
                [doc_id],
                |row| row.get::<_, i64>(0),
            )
            .optional()?;
        Ok(found.is_some())
    }
}

#[async_trait]
impl OccupancyIndex for CampusDb {
    async fn bulk_upsert(&self, docs: &[OccupancyRecord]) -> Result<BulkReport, IndexError> {
        let mut report = BulkReport::default();
        if docs.is_empty() {
            return Ok(report);
        }

        let now = chrono::Utc::now();
        let mut db = self.conn()?;
        let tx = db.transaction()?;
        {
            let mut doc_stmt = tx.prepare_cached(
                "INSERT INTO occupancy (
                    doc_id, year, semester, room, day, weeks, sections,
                    week_mask, section_mask, indexed_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                ON CONFLICT(doc_id) DO UPDATE SET indexed_at = excluded.indexed_at",
            )?;
            let mut room_stmt = tx.prepare_cached("INSERT OR IGNORE INTO rooms (room) VALUES (?1)")?;
            let mut rooms = HashSet::new();

            for doc in docs {
                let doc_id = doc.doc_id();
                let written = serde_json::to_string(&doc.weeks)
                    .and_then(|weeks| Ok((weeks, serde_json::to_string(&doc.sections)?)))
                    .map_err(IndexError::from)
                    .and_then(|(weeks, sections)| {
                        doc_stmt
                            .execute(params![
                                doc_id,
                                doc.year,
                                doc.semester,
                                doc.room,
                                doc.day,
                                weeks,
                                sections,
                                doc.week_mask().bits(),
                                doc.section_mask(),
                                now,
                            ])
                            .map_err(IndexError::from)
                    });

                match written {
                    Ok(_) => {
                        report.written += 1;
                        if rooms.insert(doc.room.as_str()) {
                            room_stmt.execute([doc.room.as_str()])?;
                        }
                    }
                    Err(e) => report.failed.push(FailedDoc {
                        doc_id,
                        reason: e.to_string(),
                    }),
                }
            }
        }
        tx.commit()?;

        debug!(
            written = report.written,
            failed = report.failed.len(),
            "Bulk upsert committed"
        );
        Ok(report)
    }

    async fn delete_other_terms(&self, year: &str, semester: &str) -> Result<usize, IndexError> {
        let db = self.conn()?;
        let deleted = db.execute(
            "DELETE FROM occupancy WHERE NOT (year = ?1 AND semester = ?2)",
            [year, semester],
        )?;
        info!(year = %year, semester = %semester, deleted, "Cleared occupancy documents of other terms");
        Ok(deleted)
    }

    async fn count_term(&self, year: &str, semester: &str) -> Result<usize, IndexError> {
        let db = self.conn()?;
        let count: i64 = db.query_row(
            "SELECT COUNT(*) FROM occupancy WHERE year = ?1 AND semester = ?2",
            [year, semester],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    async fn occupied_rooms(&self, query: &OccupancyQuery) -> Result<BTreeSet<String>, IndexError> {
        let (Some(week), Some(section)) = (WeekMask::single(query.week), section_bit(query.section))
        else {
            return Ok(BTreeSet::new());
        };

        let db = self.conn()?;
        let mut stmt = db.prepare_cached(
            "SELECT DISTINCT room
             FROM occupancy
             WHERE year = ?1 AND semester = ?2 AND day = ?3
               AND (week_mask & ?4) != 0
               AND (section_mask & ?5) != 0
               AND substr(room, 1, length(?6)) = ?6",
        )?;

        let rooms = stmt
            .query_map(
                params![
                    query.year,
                    query.semester,
                    query.day,
                    week.bits(),
                    section,
                    query.prefix,
                ],
                |row| row.get::<_, String>(0),
            )?
            .collect::<Result<BTreeSet<_>, _>>()?;

        Ok(rooms)
    }

    async fn catalog(&self, prefix: &str) -> Result<Vec<String>, IndexError> {
        let db = self.conn()?;
        let mut stmt = db.prepare_cached(
            "SELECT room FROM rooms WHERE substr(room, 1, length(?1)) = ?1 ORDER BY room",
        )?;
        let rooms = stmt
            .query_map([prefix], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rooms)
    }
}

#[async_trait]
impl EnrollmentSource for CampusDb {
    async fn get_batch(
        &self,
        year: &str,
        semester: &str,
        page: u32,
        page_size: u32,
    ) -> Result<EnrollmentBatch, IndexError> {
        let db = self.conn()?;

        let total: i64 = db.query_row(
            "SELECT COUNT(*) FROM enrollments WHERE year = ?1 AND semester = ?2",
            [year, semester],
            |row| row.get(0),
        )?;

        let offset = page.saturating_sub(1) as i64 * page_size as i64;
        let mut stmt = db.prepare_cached(
            "SELECT id, day, teacher, room, class_when, week_mask, class_name, credit, semester, year
             FROM enrollments
             WHERE year = ?1 AND semester = ?2
             ORDER BY id
             LIMIT ?3 OFFSET ?4",
        )?;

        let records = stmt
            .query_map(params![year, semester, page_size as i64, offset], |row| {
                Ok(EnrollmentRecord {
                    id: row.get(0)?,
                    day: row.get(1)?,
                    teacher: row.get(2)?,
                    room: row.get(3)?,
                    class_when: row.get(4)?,
                    week_mask: row.get(5)?,
                    class_name: row.get(6)?,
                    credit: row.get(7)?,
                    semester: row.get(8)?,
                    year: row.get(9)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(EnrollmentBatch {
            records,
            total: total.max(0) as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::occupancy::{to_occupancy, weeks_to_mask};

    fn enrollment(id: i64, room: &str, day: u8, class_when: &str, weeks: &[u8]) -> EnrollmentRecord {
        EnrollmentRecord {
            id,
            day,
            teacher: String::new(),
            room: room.to_string(),
            class_when: class_when.to_string(),
            week_mask: weeks_to_mask(weeks) as i64,
            class_name: format!("Course {id}"),
            credit: 2.0,
            semester: "1".to_string(),
            year: "2024".to_string(),
        }
    }

    fn query(week: u8, day: u8, section: u8, prefix: &str) -> OccupancyQuery {
        OccupancyQuery {
            year: "2024".to_string(),
            semester: "1".to_string(),
            week,
            day,
            section,
            prefix: prefix.to_string(),
        }
    }

    #[tokio::test]
    async fn test_upsert_is_idempotent() {
        let db = CampusDb::open_in_memory().unwrap();
        let docs: Vec<_> = [
            enrollment(1, "n1101", 2, "1-2", &[1, 2, 3]),
            enrollment(2, "n1102", 2, "3-4", &[6]),
        ]
        .iter()
        .map(|r| to_occupancy(r).unwrap())
        .collect();

        let first = db.bulk_upsert(&docs).await.unwrap();
        let second = db.bulk_upsert(&docs).await.unwrap();

        assert_eq!(first.written, 2);
        assert!(second.is_clean());
        assert_eq!(db.count_term("2024", "1").await.unwrap(), 2);
        assert!(db.has_document(&docs[0].doc_id()).unwrap());
        assert_eq!(db.documents("2024", "1").unwrap(), docs);
    }

    #[tokio::test]
    async fn test_occupied_rooms_filters_every_dimension() {
        let db = CampusDb::open_in_memory().unwrap();
        let docs: Vec<_> = [
            enrollment(1, "n1101", 2, "1-2", &[5, 6]),
            enrollment(2, "n1102", 2, "3-4", &[6]),
            enrollment(3, "n2101", 2, "1-2", &[6]),
            enrollment(4, "s1101", 2, "1-2", &[6]),
            enrollment(5, "n1103", 3, "1-2", &[6]),
        ]
        .iter()
        .map(|r| to_occupancy(r).unwrap())
        .collect();
        db.bulk_upsert(&docs).await.unwrap();

        let rooms = db.occupied_rooms(&query(6, 2, 1, "n1")).await.unwrap();
        assert_eq!(rooms.into_iter().collect::<Vec<_>>(), vec!["n1101"]);

        let rooms = db.occupied_rooms(&query(6, 2, 4, "n")).await.unwrap();
        assert_eq!(rooms.into_iter().collect::<Vec<_>>(), vec!["n1102"]);

        assert!(db.occupied_rooms(&query(7, 2, 1, "n1")).await.unwrap().is_empty());
        assert!(db.occupied_rooms(&query(31, 2, 1, "n1")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_catalog_and_registration() {
        let db = CampusDb::open_in_memory().unwrap();
        db.register_rooms(["n1201", "n1101", " ", "s1101"]).unwrap();
        db.bulk_upsert(&[to_occupancy(&enrollment(1, "n1102", 1, "1-2", &[1])).unwrap()])
            .await
            .unwrap();

        assert_eq!(db.catalog("n1").await.unwrap(), vec!["n1101", "n1102", "n1201"]);
        assert_eq!(db.catalog("").await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_delete_other_terms_keeps_current() {
        let db = CampusDb::open_in_memory().unwrap();
        let current = to_occupancy(&enrollment(1, "n1101", 1, "1-2", &[1])).unwrap();
        let mut stale = current.clone();
        stale.year = "2023".to_string();
        let mut other_semester = current.clone();
        other_semester.semester = "2".to_string();

        db.bulk_upsert(&[current, stale, other_semester]).await.unwrap();
        assert_eq!(db.delete_other_terms("2024", "1").await.unwrap(), 2);
        assert_eq!(db.delete_other_terms("2024", "1").await.unwrap(), 0);
        assert_eq!(db.count_term("2024", "1").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_enrollment_pages() {
        let db = CampusDb::open_in_memory().unwrap();
        let rows: Vec<_> = (1..=5)
            .map(|id| enrollment(id, "n1101", 1, "1-2", &[1]))
            .collect();
        db.insert_enrollments(&rows).unwrap();

        let page1 = db.get_batch("2024", "1", 1, 2).await.unwrap();
        let page3 = db.get_batch("2024", "1", 3, 2).await.unwrap();
        let page4 = db.get_batch("2024", "1", 4, 2).await.unwrap();

        assert_eq!(page1.total, 5);
        assert_eq!(page1.records.iter().map(|r| r.id).collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(page3.records.iter().map(|r| r.id).collect::<Vec<_>>(), vec![5]);
        assert!(page4.records.is_empty());
        assert!(db.get_batch("2023", "1", 1, 2).await.unwrap().records.is_empty());
    }

    #[test]
    fn test_open_file_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rooms.db");
        let db = CampusDb::open(path.to_str().unwrap()).unwrap();
        db.register_rooms(["n1101"]).unwrap();
        drop(db);

        let reopened = CampusDb::open(path.to_str().unwrap()).unwrap();
        assert_eq!(reopened.register_rooms(["n1101"]).unwrap(), 0);
    }
}
