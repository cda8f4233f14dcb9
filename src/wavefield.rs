use ndarray::Array2;

/// Displacement history of the field: three same-shape buffers covering time
/// levels `n-1`, `n` and the scratch target for `n+1`.
pub struct Wavefield {
    pub prev: Array2<f64>,
    pub curr: Array2<f64>,
    pub next: Array2<f64>,
}

impl Wavefield {
    pub fn new(nx: usize, ny: usize) -> Self {
        Wavefield {
            prev: Array2::zeros((nx, ny)),
            curr: Array2::zeros((nx, ny)),
            next: Array2::zeros((nx, ny)),
        }
    }

    pub fn dim(&self) -> (usize, usize) {
        self.curr.dim()
    }

    /// Rotate the buffers one time level: `prev <- curr`, `curr <- next`, and
    /// the old `prev` storage is recycled as the scratch buffer. Pointer swaps
    /// only, no reallocation.
    pub fn rotate(&mut self) {
        std::mem::swap(&mut self.prev, &mut self.curr);
        std::mem::swap(&mut self.curr, &mut self.next);
    }

    pub fn zero(&mut self) {
        self.prev.fill(0.0);
        self.curr.fill(0.0);
        self.next.fill(0.0);
    }
}
