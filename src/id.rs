/// Monotonic ID generator for records created outside a database sequence
/// (scenario fixtures, in-memory stores).
#[derive(Debug, Clone)]
pub struct IdGenerator {
    next: i64,
}

impl IdGenerator {
    pub fn new() -> Self {
        Self { next: 1 }
    }

    pub fn next_id(&mut self) -> i64 {
        let id = self.next;
        self.next += 1;
        id
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}
