use crate::buffer::Pixel;

/// Output channel a cluster is painted into within its mask.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Channel {
    Red,
    Green,
    Blue,
}

impl Channel {
    /// Channel roles in group order.
    pub const ALL: [Channel; 3] = [Channel::Red, Channel::Green, Channel::Blue];

    /// Role `0`, `1`, `2` within a group.
    pub fn from_role(role: usize) -> Option<Self> {
        Self::ALL.get(role).copied()
    }

    /// The pure primary painted for this channel.
    pub fn color(self) -> Pixel {
        match self {
            Channel::Red => [255, 0, 0],
            Channel::Green => [0, 255, 0],
            Channel::Blue => [0, 0, 255],
        }
    }
}

/// Up to three cluster indices that share one mask image.
///
/// The n-th cluster of the group is painted with `Channel::ALL[n]`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChannelGroup {
    index: usize,
    clusters: Vec<usize>,
}

impl ChannelGroup {
    /// Zero-based mask index of this group.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn clusters(&self) -> &[usize] {
        &self.clusters
    }

    pub fn len(&self) -> usize {
        self.clusters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }

    /// Channel assigned to `cluster`, or `None` when it belongs to another group.
    pub fn channel_of(&self, cluster: usize) -> Option<Channel> {
        self.clusters
            .iter()
            .position(|&c| c == cluster)
            .and_then(Channel::from_role)
    }

    /// `(cluster, channel)` pairs in role order.
    pub fn assignments(&self) -> impl Iterator<Item = (usize, Channel)> + '_ {
        self.clusters.iter().copied().zip(Channel::ALL)
    }
}

/// Split clusters `0..k` into consecutive groups of three.
///
/// Group `g` holds `[3g, 3g + 1, 3g + 2]` clipped to `k`, so there are
/// `ceil(k / 3)` groups and only the last may be short. A trailing group of
/// one or two clusters is kept and rendered like any other.
pub fn plan_groups(k: usize) -> Vec<ChannelGroup> {
    let roles = Channel::ALL.len();
    (0..k)
        .step_by(roles)
        .enumerate()
        .map(|(index, start)| ChannelGroup {
            index,
            clusters: (start..(start + roles).min(k)).collect(),
        })
        .collect()
}
