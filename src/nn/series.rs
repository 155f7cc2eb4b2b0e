/*
 * @Description  : SeriesNetwork：层首尾相连、单输入单输出的DagNetwork
 */

use std::ops::{Deref, DerefMut};

use crate::nn::graph::LayerGraph;
use crate::nn::layer::Layer;
use crate::nn::network::{DagNetwork, NetworkError};

#[derive(Debug)]
pub struct SeriesNetwork {
    network: DagNetwork,
}

impl SeriesNetwork {
    pub fn new(layers: Vec<Layer>) -> Result<Self, NetworkError> {
        Ok(Self {
            network: DagNetwork::new(LayerGraph::from_series(layers)?)?,
        })
    }

    pub fn new_with_seed(layers: Vec<Layer>, seed: u64) -> Result<Self, NetworkError> {
        Ok(Self {
            network: DagNetwork::new_with_seed(LayerGraph::from_series(layers)?, seed)?,
        })
    }

    pub fn into_inner(self) -> DagNetwork {
        self.network
    }
}

impl Deref for SeriesNetwork {
    type Target = DagNetwork;

    fn deref(&self) -> &DagNetwork {
        &self.network
    }
}

impl DerefMut for SeriesNetwork {
    fn deref_mut(&mut self) -> &mut DagNetwork {
        &mut self.network
    }
}
