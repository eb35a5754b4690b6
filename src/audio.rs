//! Audio path: waveform selection and the five wavetable oscillators.
//!
//! Every oscillator is kept at the same frequency, so switching the selected
//! waveform mid-play needs no retuning. [`AudioSelector`] picks which one
//! feeds the output on each sample tick.

use std::f32::consts::TAU;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

use log::warn;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::CommandError;

pub const SINE_CELLS: usize = 2048;
pub const SQUARE_CELLS: usize = 2048;
pub const TRIANGLE_CELLS: usize = 8192;
pub const SAW_CELLS: usize = 2048;
pub const NOISE_CELLS: usize = 8192;

/// Fractional bits of the oscillator phase accumulator.
const PHASE_FRACTION_BITS: u32 = 16;

/// Waveforms the audio path can emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Waveform {
    Sine,
    Square,
    Triangle,
    Saw,
    Noise,
}

impl Waveform {
    pub const ALL: [Waveform; 5] = [
        Waveform::Sine,
        Waveform::Square,
        Waveform::Triangle,
        Waveform::Saw,
        Waveform::Noise,
    ];

    /// Wire code of the waveform.
    pub fn code(self) -> u8 {
        match self {
            Waveform::Sine => b'S',
            Waveform::Square => b'C',
            Waveform::Triangle => b'T',
            Waveform::Saw => b'I',
            Waveform::Noise => b'N',
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Waveform::ALL.into_iter().find(|w| w.code() == code)
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl TryFrom<&str> for Waveform {
    type Error = CommandError;

    fn try_from(code: &str) -> Result<Self, Self::Error> {
        let waveform = match code.as_bytes() {
            [byte] => Waveform::from_code(*byte),
            _ => None,
        };
        waveform.ok_or_else(|| CommandError::UnrecognizedWaveform(code.to_string()))
    }
}

impl fmt::Display for Waveform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Waveform::Sine => "sine",
            Waveform::Square => "square",
            Waveform::Triangle => "triangle",
            Waveform::Saw => "sawtooth",
            Waveform::Noise => "noise",
        })
    }
}

/// The currently selected waveform.
///
/// Stored as a single byte so a render thread can read it while the control
/// thread writes it without tearing.
#[derive(Debug)]
pub struct WaveformState {
    code: AtomicU8,
}

impl Default for WaveformState {
    fn default() -> Self {
        Self::new(Waveform::Sine)
    }
}

impl WaveformState {
    pub fn new(waveform: Waveform) -> Self {
        Self {
            code: AtomicU8::new(waveform.code()),
        }
    }

    pub fn store(&self, waveform: Waveform) {
        self.code.store(waveform.code(), Ordering::Relaxed);
    }

    /// Returns the selected waveform, or the raw code if it is not a known one.
    pub fn load(&self) -> Result<Waveform, u8> {
        let code = self.code.load(Ordering::Relaxed);
        Waveform::from_code(code).ok_or(code)
    }

    #[cfg(test)]
    fn store_raw(&self, code: u8) {
        self.code.store(code, Ordering::Relaxed);
    }
}

/// A single cycle of 8-bit samples.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Wavetable {
    cells: Vec<i8>,
}

impl Wavetable {
    pub fn sine(len: usize) -> Self {
        Self::from_fn(len, |phase| (phase * TAU).sin())
    }

    pub fn square(len: usize) -> Self {
        Self::from_fn(len, |phase| if phase < 0.5 { 1.0 } else { -1.0 })
    }

    pub fn triangle(len: usize) -> Self {
        Self::from_fn(len, |phase| {
            if phase < 0.25 {
                4.0 * phase
            } else if phase < 0.75 {
                2.0 - 4.0 * phase
            } else {
                4.0 * phase - 4.0
            }
        })
    }

    pub fn saw(len: usize) -> Self {
        Self::from_fn(len, |phase| 2.0 * phase - 1.0)
    }

    /// Brown noise: a clamped random walk, reproducible for a given seed.
    pub fn brown_noise(len: usize, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut level: i32 = 0;
        let cells = (0..len)
            .map(|_| {
                level = (level + rng.gen_range(-8..=8)).clamp(-127, 127);
                level as i8
            })
            .collect();
        Self { cells }
    }

    fn from_fn(len: usize, shape: impl Fn(f32) -> f32) -> Self {
        let cells = (0..len)
            .map(|i| (shape(i as f32 / len as f32) * 127.0).round() as i8)
            .collect();
        Self { cells }
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn cells(&self) -> &[i8] {
        &self.cells
    }
}

/// Phase-accumulating wavetable oscillator.
#[derive(Debug, Clone)]
pub struct Oscillator {
    table: Wavetable,
    sample_rate: u32,
    frequency: u32,
    phase: u64,
    increment: u64,
}

impl Oscillator {
    pub fn new(table: Wavetable, sample_rate: u32) -> Self {
        Self {
            table,
            sample_rate,
            frequency: 0,
            phase: 0,
            increment: 0,
        }
    }

    pub fn set_frequency(&mut self, frequency: u32) {
        self.frequency = frequency;
        self.increment = ((u64::from(frequency) * self.table.len() as u64) << PHASE_FRACTION_BITS)
            / u64::from(self.sample_rate.max(1));
    }

    pub fn frequency(&self) -> u32 {
        self.frequency
    }

    /// Returns the current cell and advances the phase by one sample.
    pub fn next_sample(&mut self) -> i8 {
        if self.table.is_empty() {
            return 0;
        }
        let span = (self.table.len() as u64) << PHASE_FRACTION_BITS;
        let cell = self.table.cells()[(self.phase >> PHASE_FRACTION_BITS) as usize];
        self.phase = (self.phase + self.increment) % span;
        cell
    }
}

/// One oscillator per waveform.
#[derive(Debug, Clone)]
pub struct OscillatorBank {
    oscillators: [Oscillator; 5],
    frequency: u32,
}

impl OscillatorBank {
    pub fn new(sample_rate: u32, noise_seed: u64) -> Self {
        let osc = |table| Oscillator::new(table, sample_rate);
        Self {
            oscillators: [
                osc(Wavetable::sine(SINE_CELLS)),
                osc(Wavetable::square(SQUARE_CELLS)),
                osc(Wavetable::triangle(TRIANGLE_CELLS)),
                osc(Wavetable::saw(SAW_CELLS)),
                osc(Wavetable::brown_noise(NOISE_CELLS, noise_seed)),
            ],
            frequency: 0,
        }
    }

    /// Tunes all five oscillators, whichever one is selected.
    pub fn set_frequency(&mut self, frequency: u32) {
        self.frequency = frequency;
        for oscillator in self.oscillators.iter_mut() {
            oscillator.set_frequency(frequency);
        }
    }

    pub fn frequency(&self) -> u32 {
        self.frequency
    }

    pub fn get(&self, waveform: Waveform) -> &Oscillator {
        &self.oscillators[waveform.index()]
    }

    pub fn get_mut(&mut self, waveform: Waveform) -> &mut Oscillator {
        &mut self.oscillators[waveform.index()]
    }
}

/// Picks the oscillator feeding the output on each audio tick.
#[derive(Debug, Clone, Copy, Default)]
pub struct AudioSelector;

impl AudioSelector {
    /// Returns the next sample of the selected oscillator, widened to 16 bits.
    /// An unknown stored code falls back to sine.
    pub fn next_sample(state: &WaveformState, bank: &mut OscillatorBank) -> i16 {
        let waveform = state.load().unwrap_or_else(|code| {
            warn!("Wrong waveform code {code:#04x}, falling back to sine");
            Waveform::Sine
        });
        i16::from(bank.get_mut(waveform).next_sample()) << 8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn waveform_codes() {
        assert_eq!(Waveform::try_from("S"), Ok(Waveform::Sine));
        assert_eq!(Waveform::try_from("C"), Ok(Waveform::Square));
        assert_eq!(Waveform::try_from("T"), Ok(Waveform::Triangle));
        assert_eq!(Waveform::try_from("I"), Ok(Waveform::Saw));
        assert_eq!(Waveform::try_from("N"), Ok(Waveform::Noise));
        assert_eq!(
            Waveform::try_from("SS"),
            Err(CommandError::UnrecognizedWaveform(String::from("SS")))
        );
        assert_eq!(
            Waveform::try_from(""),
            Err(CommandError::UnrecognizedWaveform(String::new()))
        );
    }

    #[test]
    fn waveform_state_defaults_to_sine() {
        let state = WaveformState::default();
        assert_eq!(state.load(), Ok(Waveform::Sine));
        state.store(Waveform::Noise);
        assert_eq!(state.load(), Ok(Waveform::Noise));
    }

    #[test]
    fn tables_have_expected_shape() {
        let sine = Wavetable::sine(SINE_CELLS);
        assert_eq!(sine.cells()[0], 0);
        assert_eq!(sine.cells()[SINE_CELLS / 4], 127);
        assert_eq!(sine.cells()[3 * SINE_CELLS / 4], -127);

        let saw = Wavetable::saw(SAW_CELLS);
        assert!(saw.cells().windows(2).all(|w| w[0] <= w[1]));

        let square = Wavetable::square(SQUARE_CELLS);
        assert!(square.cells().iter().all(|&c| c == 127 || c == -127));

        let triangle = Wavetable::triangle(TRIANGLE_CELLS);
        assert_eq!(triangle.cells()[TRIANGLE_CELLS / 4], 127);
    }

    #[test]
    fn noise_table_is_reproducible() {
        let a = Wavetable::brown_noise(NOISE_CELLS, 7);
        let b = Wavetable::brown_noise(NOISE_CELLS, 7);
        assert_eq!(a, b);
        assert!(a.cells().windows(2).all(|w| (i32::from(w[0]) - i32::from(w[1])).abs() <= 8));
    }

    #[test]
    fn oscillator_steps_through_table_at_frequency() {
        // 4 cells at 4 Hz and a 16 Hz sample rate: one cell per sample.
        let table = Wavetable { cells: vec![10, 20, 30, 40] };
        let mut osc = Oscillator::new(table, 16);
        osc.set_frequency(4);
        let samples: Vec<i8> = (0..6).map(|_| osc.next_sample()).collect();
        assert_eq!(samples, vec![10, 20, 30, 40, 10, 20]);
    }

    #[test]
    fn silent_oscillator_holds_first_cell() {
        let mut osc = Oscillator::new(Wavetable::square(SQUARE_CELLS), 16_384);
        assert_eq!(osc.next_sample(), 127);
        assert_eq!(osc.next_sample(), 127);
    }

    #[test]
    fn bank_tunes_every_oscillator() {
        let mut bank = OscillatorBank::new(16_384, 1);
        bank.set_frequency(440);
        assert_eq!(bank.frequency(), 440);
        for waveform in Waveform::ALL {
            assert_eq!(bank.get(waveform).frequency(), 440);
        }
    }

    #[test]
    fn selector_reads_selected_oscillator() {
        let mut bank = OscillatorBank::new(16_384, 1);
        let state = WaveformState::new(Waveform::Square);
        assert_eq!(AudioSelector::next_sample(&state, &mut bank), 127 << 8);

        state.store(Waveform::Sine);
        assert_eq!(AudioSelector::next_sample(&state, &mut bank), 0);
    }

    #[test]
    fn selector_falls_back_to_sine_on_unknown_code() {
        let mut bank = OscillatorBank::new(16_384, 1);
        bank.set_frequency(4_096);
        let state = WaveformState::default();
        state.store_raw(b'?');
        assert_eq!(state.load(), Err(b'?'));

        let mut reference = OscillatorBank::new(16_384, 1);
        reference.set_frequency(4_096);
        for _ in 0..16 {
            let expected = i16::from(reference.get_mut(Waveform::Sine).next_sample()) << 8;
            assert_eq!(AudioSelector::next_sample(&state, &mut bank), expected);
        }
    }
}
