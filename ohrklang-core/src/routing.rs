use ndarray::{Array2, ArrayView2};

use crate::ConfigurationError;

/// Physical channels of the three measurement roles on one side of the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChannelRoles {
    pub left: Option<usize>,
    pub right: Option<usize>,
    pub feedback: Option<usize>,
}

impl ChannelRoles {
    /// Zero-indexed `[left, right, feedback]`, negative values disable a role.
    pub fn from_indices(indices: [i32; 3]) -> Self {
        let role = |i: i32| usize::try_from(i).ok();

        Self {
            left: role(indices[0]),
            right: role(indices[1]),
            feedback: role(indices[2]),
        }
    }

    pub fn to_indices(self) -> [i32; 3] {
        let index = |role: Option<usize>| role.map_or(-1, |c| c as i32);

        [index(self.left), index(self.right), index(self.feedback)]
    }

    pub fn enabled(&self) -> impl Iterator<Item = usize> {
        [self.left, self.right, self.feedback].into_iter().flatten()
    }

    fn ears(&self) -> impl Iterator<Item = usize> {
        [self.left, self.right].into_iter().flatten()
    }

    /// Number of device channels needed to address every enabled role.
    pub fn active_channels(&self) -> usize {
        self.enabled().max().map_or(0, |c| c + 1)
    }
}

/// Signals pulled out of a raw multichannel recording.
#[derive(Debug, Clone, PartialEq)]
pub struct Extracted {
    pub left: Vec<f32>,
    pub right: Vec<f32>,
    pub feedback: Option<Vec<f32>>,
}

/// Maps the logical measurement roles onto physical device channels.
///
/// The feedback loop only exists as a pair: disabling it on one side disables
/// it on the other as well.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelLayout {
    input: ChannelRoles,
    output: ChannelRoles,
}

impl ChannelLayout {
    pub fn new(
        mut input: ChannelRoles,
        mut output: ChannelRoles,
    ) -> Result<Self, ConfigurationError> {
        if input.feedback.is_none() || output.feedback.is_none() {
            input.feedback = None;
            output.feedback = None;
        }

        if output.active_channels() == 0 {
            return Err(ConfigurationError::NoOutputChannels);
        }

        if input.ears().next().is_none() {
            return Err(ConfigurationError::NoInputChannels);
        }

        Ok(Self { input, output })
    }

    pub fn from_indices(input: [i32; 3], output: [i32; 3]) -> Result<Self, ConfigurationError> {
        Self::new(
            ChannelRoles::from_indices(input),
            ChannelRoles::from_indices(output),
        )
    }

    pub fn input(&self) -> ChannelRoles {
        self.input
    }

    pub fn output(&self) -> ChannelRoles {
        self.output
    }

    pub fn feedback_used(&self) -> bool {
        self.input.feedback.is_some()
    }

    pub fn input_channels(&self) -> usize {
        self.input.active_channels()
    }

    pub fn output_channels(&self) -> usize {
        self.output.active_channels()
    }

    /// Spreads `source` over the enabled output roles of a zeroed buffer.
    ///
    /// A single source column goes to every enabled role, otherwise the n-th
    /// column goes to the n-th enabled role (left, right, feedback).
    pub fn route(&self, source: ArrayView2<'_, f32>) -> Result<Array2<f32>, ConfigurationError> {
        let roles: Vec<_> = self.output.enabled().collect();
        self.route_to(source, &roles)
    }

    pub fn route_mono(&self, mono: &[f32]) -> Array2<f32> {
        let roles: Vec<_> = self.output.enabled().collect();
        self.spread(mono, &roles)
    }

    /// Routes a notification cue to the ear channels only, the feedback loop stays silent.
    pub fn route_cue(&self, cue: &[f32], level: f32) -> Array2<f32> {
        let cue: Vec<_> = cue.iter().map(|s| s * level).collect();
        let roles: Vec<_> = self.output.ears().collect();
        self.spread(&cue, &roles)
    }

    fn spread(&self, mono: &[f32], roles: &[usize]) -> Array2<f32> {
        let mut buffer = Array2::zeros((mono.len(), self.output_channels()));

        for &channel in roles {
            for (o, s) in buffer.column_mut(channel).iter_mut().zip(mono) {
                *o = *s;
            }
        }

        buffer
    }

    fn route_to(
        &self,
        source: ArrayView2<'_, f32>,
        roles: &[usize],
    ) -> Result<Array2<f32>, ConfigurationError> {
        let n_columns = source.ncols();
        if n_columns != 1 && n_columns != roles.len() {
            return Err(ConfigurationError::SourceChannels {
                expected: roles.len(),
                actual: n_columns,
            });
        }

        let mut buffer = Array2::zeros((source.nrows(), self.output_channels()));

        for (n, &channel) in roles.iter().enumerate() {
            let column = if n_columns == 1 { 0 } else { n };
            buffer.column_mut(channel).assign(&source.column(column));
        }

        Ok(buffer)
    }

    /// Pulls the per-role signals out of a raw recording. Disabled ears are
    /// filled with silence, a disabled feedback loop yields `None`.
    pub fn extract(&self, raw: ArrayView2<'_, f32>) -> Result<Extracted, ConfigurationError> {
        let available = raw.ncols();
        let n_samples = raw.nrows();

        let column = |role: Option<usize>| -> Result<Option<Vec<f32>>, ConfigurationError> {
            match role {
                Some(channel) if channel >= available => {
                    Err(ConfigurationError::ChannelOutOfRange { channel, available })
                }
                Some(channel) => Ok(Some(raw.column(channel).to_vec())),
                None => Ok(None),
            }
        };

        let left = column(self.input.left)?.unwrap_or_else(|| vec![0.0; n_samples]);
        let right = column(self.input.right)?.unwrap_or_else(|| vec![0.0; n_samples]);
        let feedback = column(self.input.feedback)?;

        Ok(Extracted {
            left,
            right,
            feedback,
        })
    }
}

impl Default for ChannelLayout {
    fn default() -> Self {
        Self {
            input: ChannelRoles::from_indices([0, 1, -1]),
            output: ChannelRoles::from_indices([0, 1, -1]),
        }
    }
}

#[cfg(test)]
mod test {
    use ndarray::{array, Array2};

    use super::{ChannelLayout, ChannelRoles};
    use crate::ConfigurationError;

    #[test]
    fn negative_index_disables_role() {
        let roles = ChannelRoles::from_indices([2, -1, 0]);

        assert_eq!(Some(2), roles.left);
        assert_eq!(None, roles.right);
        assert_eq!(Some(0), roles.feedback);
        assert_eq!([2, -1, 0], roles.to_indices());
        assert_eq!(3, roles.active_channels());
    }

    #[test]
    fn feedback_is_disabled_on_both_sides() {
        let layout = ChannelLayout::from_indices([0, 1, 4], [0, 1, -1]).unwrap();

        assert!(!layout.feedback_used());
        assert_eq!(None, layout.input().feedback);
        assert_eq!(2, layout.input_channels());

        let layout = ChannelLayout::from_indices([0, 1, -1], [0, 1, 5]).unwrap();

        assert_eq!(None, layout.output().feedback);
        assert_eq!(2, layout.output_channels());
    }

    #[test]
    fn feedback_loop_widens_device() {
        let layout = ChannelLayout::from_indices([0, 1, 3], [1, 2, 5]).unwrap();

        assert!(layout.feedback_used());
        assert_eq!(4, layout.input_channels());
        assert_eq!(6, layout.output_channels());
    }

    #[test]
    fn rejects_layout_without_channels() {
        assert_eq!(
            Err(ConfigurationError::NoOutputChannels),
            ChannelLayout::from_indices([0, 1, -1], [-1, -1, -1])
        );
        assert_eq!(
            Err(ConfigurationError::NoInputChannels),
            ChannelLayout::from_indices([-1, -1, 2], [0, 1, 2])
        );
    }

    #[test]
    fn unreferenced_columns_stay_silent() {
        let layout = ChannelLayout::from_indices([0, 1, 2], [3, -1, 1]).unwrap();
        let mono = [0.5, -0.25, 1.0];

        let buffer = layout.route_mono(&mono);

        assert_eq!(&[3, 4], buffer.shape());
        assert_eq!(array![0.5f32, -0.25, 1.0], buffer.column(3));
        assert_eq!(array![0.5f32, -0.25, 1.0], buffer.column(1));
        assert!(buffer.column(0).iter().all(|s| *s == 0.0));
        assert!(buffer.column(2).iter().all(|s| *s == 0.0));
    }

    #[test]
    fn route_spreads_columns_in_role_order() {
        let layout = ChannelLayout::from_indices([0, 1, -1], [2, 0, -1]).unwrap();
        let source = array![[1.0f32, 2.0], [3.0, 4.0]];

        let buffer = layout.route(source.view()).unwrap();

        assert_eq!(array![[2.0f32, 0.0, 1.0], [4.0, 0.0, 3.0]], buffer);
    }

    #[test]
    fn route_rejects_mismatched_source() {
        let layout = ChannelLayout::default();
        let source = Array2::<f32>::zeros((10, 3));

        assert_eq!(
            Err(ConfigurationError::SourceChannels {
                expected: 2,
                actual: 3
            }),
            layout.route(source.view())
        );
    }

    #[test]
    fn cue_skips_feedback_loop() {
        let layout = ChannelLayout::from_indices([0, 1, 2], [0, 1, 2]).unwrap();

        let buffer = layout.route_cue(&[1.0, 1.0], 0.05);

        assert_eq!(array![0.05f32, 0.05], buffer.column(0));
        assert_eq!(array![0.05f32, 0.05], buffer.column(1));
        assert!(buffer.column(2).iter().all(|s| *s == 0.0));
    }

    #[test]
    fn extract_picks_roles() {
        let layout = ChannelLayout::from_indices([2, -1, 0], [0, 1, 2]).unwrap();
        let raw = array![[1.0f32, 2.0, 3.0], [4.0, 5.0, 6.0]];

        let extracted = layout.extract(raw.view()).unwrap();

        assert_eq!(vec![3.0, 6.0], extracted.left);
        assert_eq!(vec![0.0, 0.0], extracted.right);
        assert_eq!(Some(vec![1.0, 4.0]), extracted.feedback);
    }

    #[test]
    fn extract_rejects_missing_channel() {
        let layout = ChannelLayout::from_indices([0, 3, -1], [0, 1, -1]).unwrap();
        let raw = Array2::<f32>::zeros((4, 2));

        assert_eq!(
            Err(ConfigurationError::ChannelOutOfRange {
                channel: 3,
                available: 2
            }),
            layout.extract(raw.view())
        );
    }
}
