//! Two stage smoothing applied to the raw readings: a moving average over the
//! last few samples followed by an exponentially weighted moving average.

/// Number of samples averaged by the moving average stage.
pub const WINDOW: usize = 5;

/// Moving average over the last `N` samples.
///
/// Slots that have not been written yet do not take part in the average, so
/// the filter does not drag early readings towards zero.
///
/// `N` must be at least 1; an empty window is rejected at compile time:
///
/// ```compile_fail
/// let average = acd1100::filter::MovingAverage::<0>::new();
/// ```
#[derive(Clone, Debug)]
pub struct MovingAverage<const N: usize> {
    samples: [Option<f32>; N],
    next: usize,
}

impl<const N: usize> MovingAverage<N> {
    const NON_EMPTY: () = assert!(N > 0, "moving average window must not be empty");

    pub const fn new() -> Self {
        #[allow(clippy::let_unit_value)]
        let () = Self::NON_EMPTY;
        Self {
            samples: [None; N],
            next: 0,
        }
    }

    /// Store `value`, overwriting the oldest sample once the window is full,
    /// and return the new average.
    pub fn apply(&mut self, value: f32) -> f32 {
        self.samples[self.next] = Some(value);
        self.next = (self.next + 1) % N;

        let (sum, count) = self
            .samples
            .iter()
            .flatten()
            .fold((0.0, 0u32), |(sum, count), &x| (sum + x, count + 1));
        sum / count as f32
    }

    /// Number of samples currently taking part in the average.
    pub fn len(&self) -> usize {
        self.samples.iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<const N: usize> Default for MovingAverage<N> {
    fn default() -> Self {
        Self::new()
    }
}

/// Exponentially weighted moving average.
#[derive(Clone, Debug)]
pub struct Ewma {
    alpha: f32,
    previous: Option<f32>,
}

impl Ewma {
    pub const fn new(alpha: f32) -> Self {
        Self {
            alpha,
            previous: None,
        }
    }

    /// Feed `value` into the filter. The first value passes through unchanged.
    pub fn apply(&mut self, value: f32) -> f32 {
        let smoothed = match self.previous {
            None => value,
            Some(previous) => self.alpha * value + (1.0 - self.alpha) * previous,
        };
        self.previous = Some(smoothed);
        smoothed
    }

    pub fn value(&self) -> Option<f32> {
        self.previous
    }
}

/// Both filter stages for a single measured quantity.
#[derive(Clone, Debug)]
pub struct ChannelFilter {
    average: MovingAverage<WINDOW>,
    ewma: Ewma,
}

impl ChannelFilter {
    pub const fn new(alpha: f32) -> Self {
        Self {
            average: MovingAverage::new(),
            ewma: Ewma::new(alpha),
        }
    }

    pub fn apply(&mut self, value: f32) -> f32 {
        let averaged = self.average.apply(value);
        self.ewma.apply(averaged)
    }

    pub fn value(&self) -> Option<f32> {
        self.ewma.value()
    }
}

/// Filter state of the sampling pipeline: one independent filter per channel.
#[derive(Clone, Debug)]
pub struct FilterState {
    pub co2: ChannelFilter,
    pub temperature: ChannelFilter,
}

impl FilterState {
    pub const fn new(alpha: f32) -> Self {
        Self {
            co2: ChannelFilter::new(alpha),
            temperature: ChannelFilter::new(alpha),
        }
    }
}
