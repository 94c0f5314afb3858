//! Click-free delay changes by frame expansion/compression
//!
//! Adding D samples of delay to a block without a click: the current frame
//! is resampled from N to N + D - D_prev samples with linear
//! interpolation, and the last D samples are held over in a side buffer
//! for the next frame. A delay decrease runs the same resampler in
//! compression. When the delay is unchanged the frame is passed through
//! and the held samples rotate.

use resona_core::SampleBuffer;

/// Apply `new_delay` samples of delay to `input`.
///
/// `delay_buffer` holds the samples carried over from the previous frame
/// (its length is the previously applied delay) and is updated in place.
pub fn process_add_delay(
    input: &SampleBuffer,
    delay_buffer: &mut Vec<f32>,
    new_delay: usize,
) -> SampleBuffer {
    let len = input.len();
    let old_delay = delay_buffer.len();
    let mut output = SampleBuffer::new(len);

    // Leading samples come from the previous frame's holdover
    for (i, &held) in delay_buffer.iter().enumerate() {
        output[i] = held;
    }

    if new_delay == old_delay {
        // Unchanged delay: plain copy, rotate the holdover
        let mut j = 0;
        for i in old_delay..len {
            output[i] = input[j];
            j += 1;
        }
        for held in delay_buffer.iter_mut() {
            *held = input[j];
            j += 1;
        }
        return output;
    }

    // Resample N input samples onto N - old_delay + ... output slots
    let numerator = (len - 1) as f32;
    let denominator = (len - 1 + new_delay) as f32 - old_delay as f32;
    let compression_factor = numerator / denominator;

    let mut position = 0.0f32;
    let interpolate = |position: f32| {
        let j = position as usize;
        let rest = position - j as f32;
        let next = if j + 1 < len { input[j + 1] } else { input[j] };
        input[j] * (1.0 - rest) + next * rest
    };

    let loop_end = if new_delay == 0 { len - 1 } else { len };
    for i in old_delay..loop_end {
        output[i] = interpolate(position);
        position += compression_factor;
    }

    if new_delay == 0 {
        output[len - 1] = input[len - 1];
        delay_buffer.clear();
    } else {
        let mut held = Vec::with_capacity(new_delay);
        for _ in 0..new_delay - 1 {
            held.push(interpolate(position));
            position += compression_factor;
        }
        held.push(input[len - 1]);
        *delay_buffer = held;
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_steady_delay_shifts_the_signal() {
        let delay = 4;
        let mut holdover = Vec::new();

        // First frame establishes the delay by expansion
        let ramp: Vec<f32> = (0..16).map(|i| i as f32).collect();
        let _ = process_add_delay(&SampleBuffer::from_samples(ramp), &mut holdover, delay);
        assert_eq!(holdover.len(), delay);
        // Holdover ends exactly on the last input sample
        assert_eq!(*holdover.last().unwrap(), 15.0);
        let held = holdover.clone();

        // Second frame keeps the delay: starts with the held tail, then the
        // new frame, and holds its own tail
        let second = process_add_delay(
            &SampleBuffer::from_samples(vec![100.0; 16]),
            &mut holdover,
            delay,
        );
        assert_eq!(&second.as_slice()[..delay], held.as_slice());
        assert!(second.as_slice()[delay..].iter().all(|&s| s == 100.0));
        assert_eq!(holdover, vec![100.0; delay]);
    }

    #[test]
    fn test_zero_to_zero_is_identity() {
        let mut holdover = Vec::new();
        let input = SampleBuffer::from_samples((0..8).map(|i| i as f32).collect());
        let output = process_add_delay(&input, &mut holdover, 0);
        assert_eq!(output, input);
        assert!(holdover.is_empty());
    }

    #[test]
    fn test_delay_growth_keeps_endpoints() {
        let mut holdover = Vec::new();
        let input = SampleBuffer::from_samples((0..16).map(|i| i as f32).collect());
        let output = process_add_delay(&input, &mut holdover, 3);

        // First output sample is the first input sample (nothing held yet)
        assert_eq!(output[0], 0.0);
        // Expansion stretches monotonically
        for i in 1..16 {
            assert!(output[i] >= output[i - 1]);
        }
        // The frame tail is held for the next block, ending on the last
        // input sample
        assert_eq!(holdover.len(), 3);
        assert_eq!(*holdover.last().unwrap(), 15.0);
    }

    #[test]
    fn test_delay_removal_compresses_back() {
        let mut holdover = Vec::new();
        let input = SampleBuffer::from_samples((0..16).map(|i| i as f32).collect());
        let _ = process_add_delay(&input, &mut holdover, 3);

        let next = SampleBuffer::from_samples((16..32).map(|i| i as f32).collect());
        let output = process_add_delay(&next, &mut holdover, 0);
        assert!(holdover.is_empty());
        // Ends exactly on the newest sample, no discontinuity at the seam
        assert_eq!(output[15], 31.0);
        for i in 1..16 {
            assert!(output[i] >= output[i - 1]);
        }
    }
}
