use std::sync::{Mutex, MutexGuard};

use bytes::Bytes;

use crate::protocol::message::SeatRecord;

/// Size of the seat pool.
pub const NUM_SEATS: usize = 100;

/// Mutable part of a seat, behind the seat's own lock.
#[derive(Debug, Default)]
pub struct SeatState {
    owner: Option<Bytes>,
    times_booked: u64,
    times_canceled: u64,
}

impl SeatState {
    pub fn is_booked(&self) -> bool {
        self.owner.is_some()
    }

    pub fn is_booked_by(&self, username: &[u8]) -> bool {
        self.owner.as_deref() == Some(username)
    }

    pub fn book(&mut self, username: Bytes) {
        self.owner = Some(username);
        self.times_booked += 1;
    }

    pub fn cancel(&mut self) {
        self.owner = None;
        self.times_canceled += 1;
    }
}

#[derive(Debug)]
pub struct Seat {
    id: u32,
    state: Mutex<SeatState>,
}

impl Seat {
    fn new(id: u32) -> Self {
        Self {
            id,
            state: Mutex::default(),
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn lock(&self) -> MutexGuard<'_, SeatState> {
        super::lock(&self.state)
    }

    /// Snapshot of the public fields, taken under the seat lock.
    pub fn record(&self) -> SeatRecord {
        let state = self.lock();
        SeatRecord {
            id: self.id,
            booked: state.is_booked(),
            times_booked: state.times_booked,
            times_canceled: state.times_canceled,
        }
    }
}

/// The fixed seat table. Its shape never changes after construction, so only
/// the individual seats are locked.
#[derive(Debug)]
pub struct Seats {
    seats: Box<[Seat]>,
}

impl Seats {
    pub fn new(count: usize) -> Self {
        Self {
            seats: (1..=count as u32).map(Seat::new).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.seats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seats.is_empty()
    }

    /// Looks a seat up by its 1-based id.
    pub fn get(&self, id: u32) -> Option<&Seat> {
        let idx = (id as usize).checked_sub(1)?;
        self.seats.get(idx)
    }

    /// Resolves seat number text as sent on the wire.
    ///
    /// Anything that is not a base-10 number naming an existing seat yields
    /// `None`; callers do not tell "abc" apart from "0" or "101".
    pub fn parse(&self, text: &[u8]) -> Option<&Seat> {
        let text = std::str::from_utf8(text).ok()?.trim();
        let id = text.parse::<u32>().ok()?;
        self.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Seat> {
        self.seats.iter()
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::Seats;

    #[test]
    fn parse_seat_numbers() {
        let seats = Seats::new(100);

        assert_eq!(seats.parse(b"1").map(|seat| seat.id()), Some(1));
        assert_eq!(seats.parse(b"100").map(|seat| seat.id()), Some(100));
        assert_eq!(seats.parse(b" 42\n").map(|seat| seat.id()), Some(42));

        for bad in [&b"0"[..], b"101", b"abc", b"", b"-1", b"4x", b"\xff"] {
            assert!(seats.parse(bad).is_none(), "{bad:?}");
        }
    }

    #[test]
    fn counters_follow_bookings() {
        let seats = Seats::new(3);
        let seat = seats.get(2).unwrap();

        seat.lock().book(Bytes::from_static(b"alice"));
        assert!(seat.lock().is_booked_by(b"alice"));
        assert!(!seat.lock().is_booked_by(b"bob"));

        seat.lock().cancel();
        seat.lock().book(Bytes::from_static(b"bob"));

        let record = seat.record();
        assert_eq!(record.id, 2);
        assert!(record.booked);
        assert_eq!(record.times_booked, 2);
        assert_eq!(record.times_canceled, 1);

        assert!(seats.get(0).is_none());
        assert!(seats.get(4).is_none());
    }
}
