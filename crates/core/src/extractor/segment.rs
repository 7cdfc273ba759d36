use super::Segmenter;

/// Boundary detector comparing the mean feature vector before and after
/// each frame. Peaks of that distance that stand out from the curve's mean
/// by more than `sensitivity` standard deviations become boundaries.
#[derive(Debug, Clone)]
pub struct NoveltySegmenter {
    /// Frames on each side of a candidate boundary.
    pub window: usize,
    pub sensitivity: f32,
}

impl Default for NoveltySegmenter {
    fn default() -> Self {
        Self {
            window: 8,
            sensitivity: 1.0,
        }
    }
}

impl NoveltySegmenter {
    fn novelty(&self, features: &[Vec<f32>]) -> Vec<f32> {
        let window = self.window.max(1);
        (0..features.len())
            .map(|index| {
                if index < window || index + window > features.len() {
                    return 0.0;
                }
                let before = mean_vector(&features[index - window..index]);
                let after = mean_vector(&features[index..index + window]);
                before
                    .iter()
                    .zip(&after)
                    .map(|(a, b)| (a - b) * (a - b))
                    .sum::<f32>()
                    .sqrt()
            })
            .collect()
    }
}

impl Segmenter for NoveltySegmenter {
    fn segment(&self, features: &[Vec<f32>]) -> Vec<usize> {
        if features.is_empty() {
            return Vec::new();
        }
        let last = features.len() - 1;
        let novelty = self.novelty(features);

        let mean = novelty.iter().sum::<f32>() / novelty.len() as f32;
        let variance =
            novelty.iter().map(|v| (v - mean) * (v - mean)).sum::<f32>() / novelty.len() as f32;
        let threshold = mean + self.sensitivity * variance.sqrt();

        let mut boundaries = vec![0];
        for index in 1..last {
            let is_peak = novelty[index] > threshold
                && novelty[index] >= novelty[index - 1]
                && novelty[index] > novelty[index + 1];
            let spaced = boundaries
                .last()
                .map(|previous| index - previous >= self.window.max(1))
                .unwrap_or(true);
            if is_peak && spaced {
                boundaries.push(index);
            }
        }
        if last > 0 {
            boundaries.push(last);
        }
        boundaries
    }
}

fn mean_vector(rows: &[Vec<f32>]) -> Vec<f32> {
    let width = rows.iter().map(Vec::len).min().unwrap_or(0);
    let mut mean = vec![0.0; width];
    for row in rows {
        for (acc, value) in mean.iter_mut().zip(row) {
            *acc += value;
        }
    }
    for acc in &mut mean {
        *acc /= rows.len() as f32;
    }
    mean
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_the_step_between_two_sections() {
        let mut features = vec![vec![0.0, 0.0]; 30];
        features.extend(vec![vec![10.0, 10.0]; 30]);

        let boundaries = NoveltySegmenter::default().segment(&features);
        assert_eq!(boundaries.first(), Some(&0));
        assert_eq!(boundaries.last(), Some(&59));
        assert!(boundaries.contains(&30), "{boundaries:?}");
    }

    #[test]
    fn flat_features_only_yield_the_implicit_boundaries() {
        let features = vec![vec![1.0; 4]; 40];
        assert_eq!(NoveltySegmenter::default().segment(&features), vec![0, 39]);
    }

    #[test]
    fn empty_input_has_no_boundaries() {
        assert!(NoveltySegmenter::default().segment(&[]).is_empty());
    }
}
