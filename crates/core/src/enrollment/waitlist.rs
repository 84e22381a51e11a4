use crate::domain::enrollment::{EnrollmentId, EnrollmentStatus, SessionEnrollment};

/// Position-ordered queue over the waitlisted rows of one session.
pub struct Waitlist<'a> {
    rows: &'a mut [SessionEnrollment],
}

impl<'a> Waitlist<'a> {
    pub fn new(rows: &'a mut [SessionEnrollment]) -> Self {
        Self { rows }
    }

    /// Row indices in promotion order.
    fn order(&self) -> Vec<usize> {
        let mut queued: Vec<usize> = self
            .rows
            .iter()
            .enumerate()
            .filter(|(_, row)| row.status == EnrollmentStatus::Waitlisted)
            .map(|(index, _)| index)
            .collect();
        queued.sort_by(|left, right| {
            let (left, right) = (&self.rows[*left], &self.rows[*right]);
            left.waitlist_position
                .unwrap_or(u32::MAX)
                .cmp(&right.waitlist_position.unwrap_or(u32::MAX))
                .then_with(|| left.enrolled_at.cmp(&right.enrolled_at))
                .then_with(|| left.id.0.cmp(&right.id.0))
        });
        queued
    }

    pub fn len(&self) -> usize {
        self.rows.iter().filter(|row| row.status == EnrollmentStatus::Waitlisted).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Queues the row at `index` behind everyone already waiting.
    pub fn insert_at_end(&mut self, index: usize) -> u32 {
        let ahead = self
            .rows
            .iter()
            .enumerate()
            .filter(|(other, row)| *other != index && row.status == EnrollmentStatus::Waitlisted)
            .count();
        let position = u32::try_from(ahead).unwrap_or(u32::MAX - 1) + 1;
        let row = &mut self.rows[index];
        row.status = EnrollmentStatus::Waitlisted;
        row.waitlist_position = Some(position);
        position
    }

    /// Takes the head of the queue off the waitlist. The caller decides its new status.
    pub fn pop_front(&mut self) -> Option<usize> {
        let head = self.order().into_iter().next()?;
        self.rows[head].waitlist_position = None;
        Some(head)
    }

    /// Closes the gaps left by removed rows: positions become `1..=len`.
    pub fn renumber(&mut self) {
        for (rank, index) in self.order().into_iter().enumerate() {
            self.rows[index].waitlist_position = Some(u32::try_from(rank + 1).unwrap_or(u32::MAX));
        }
    }

    pub fn positions(&self) -> Vec<(EnrollmentId, u32)> {
        self.order()
            .into_iter()
            .filter_map(|index| {
                let row = &self.rows[index];
                row.waitlist_position.map(|position| (row.id.clone(), position))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};

    use crate::domain::enrollment::{EnrollmentId, EnrollmentStatus, SessionEnrollment};
    use crate::domain::session::SessionId;
    use crate::domain::user::UserId;
    use crate::enrollment::waitlist::Waitlist;

    fn row(id: &str, status: EnrollmentStatus, position: Option<u32>, minute: i64) -> SessionEnrollment {
        let base = Utc.with_ymd_and_hms(2026, 5, 4, 8, 0, 0).unwrap();
        SessionEnrollment::new(
            EnrollmentId(id.to_owned()),
            SessionId("s-1".to_owned()),
            UserId::new(format!("user-{id}")),
            status,
            position,
            base + Duration::minutes(minute),
        )
    }

    #[test]
    fn pop_front_takes_the_lowest_position() {
        let mut rows = vec![
            row("a", EnrollmentStatus::Confirmed, None, 0),
            row("c", EnrollmentStatus::Waitlisted, Some(2), 1),
            row("b", EnrollmentStatus::Waitlisted, Some(1), 2),
        ];
        let mut waitlist = Waitlist::new(&mut rows);

        let head = waitlist.pop_front().expect("head");
        assert_eq!(rows[head].id, EnrollmentId("b".to_owned()));
        assert_eq!(rows[head].waitlist_position, None);
    }

    #[test]
    fn renumber_closes_gaps_in_queue_order() {
        let mut rows = vec![
            row("x", EnrollmentStatus::Waitlisted, Some(4), 0),
            row("y", EnrollmentStatus::Cancelled, None, 1),
            row("z", EnrollmentStatus::Waitlisted, Some(2), 2),
        ];
        let mut waitlist = Waitlist::new(&mut rows);
        waitlist.renumber();

        assert_eq!(
            waitlist.positions(),
            vec![(EnrollmentId("z".to_owned()), 1), (EnrollmentId("x".to_owned()), 2)]
        );
    }

    #[test]
    fn insert_at_end_queues_behind_existing_rows() {
        let mut rows = vec![
            row("p", EnrollmentStatus::Waitlisted, Some(1), 0),
            row("q", EnrollmentStatus::Confirmed, None, 1),
        ];
        let mut waitlist = Waitlist::new(&mut rows);

        assert_eq!(waitlist.insert_at_end(1), 2);
        assert_eq!(waitlist.len(), 2);
        assert_eq!(rows[1].status, EnrollmentStatus::Waitlisted);
    }
}
