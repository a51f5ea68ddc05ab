/// Safety margin added to every squared target-neighbor distance.
pub const MARGIN: f64 = 1.0;
