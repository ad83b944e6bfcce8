use serde::{Deserialize, Serialize};

use super::ModelError;

/// A single node of a regression tree.
///
/// Split nodes carry `feature`, `threshold` and both children. Leaves carry
/// `leaf`. `cover` is the (weighted) number of training rows that reached the
/// node and drives both the expected value and the attribution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feature: Option<usize>,
    #[serde(default)]
    pub threshold: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub left: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub right: Option<usize>,
    /// Direction taken by missing (NaN) inputs.
    #[serde(default = "default_left")]
    pub default_left: bool,
    #[serde(default)]
    pub leaf: f64,
    pub cover: f64,
}

fn default_left() -> bool {
    true
}

impl Node {
    pub fn split(feature: usize, threshold: f64, left: usize, right: usize, cover: f64) -> Self {
        Self {
            feature: Some(feature),
            threshold,
            left: Some(left),
            right: Some(right),
            default_left: true,
            leaf: 0.0,
            cover,
        }
    }

    pub fn leaf(value: f64, cover: f64) -> Self {
        Self {
            feature: None,
            threshold: 0.0,
            left: None,
            right: None,
            default_left: true,
            leaf: value,
            cover,
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.feature.is_none()
    }

    fn goes_left(&self, value: f64) -> bool {
        if value.is_nan() {
            self.default_left
        } else {
            value <= self.threshold
        }
    }
}

/// A binary regression tree stored as a flat node array rooted at index 0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tree {
    pub nodes: Vec<Node>,
}

#[derive(Debug, Clone, Copy)]
struct PathElement {
    feature: Option<usize>,
    zero_fraction: f64,
    one_fraction: f64,
    pweight: f64,
}

impl Tree {
    pub fn new(nodes: Vec<Node>) -> Self {
        Self { nodes }
    }

    /// Checks the node graph against the input width.
    ///
    /// Children must point strictly forward in the array, which rules out
    /// cycles and keeps every traversal bounded by the node count.
    pub fn validate(&self, n_features: usize) -> Result<(), ModelError> {
        if self.nodes.is_empty() {
            return Err(ModelError::Invalid("tree has no nodes".to_string()));
        }
        for (idx, node) in self.nodes.iter().enumerate() {
            let Some(feature) = node.feature else {
                continue;
            };
            if feature >= n_features {
                return Err(ModelError::Invalid(format!(
                    "node {} splits on feature {} but the model has {} features",
                    idx, feature, n_features
                )));
            }
            if !(node.cover > 0.0) {
                return Err(ModelError::Invalid(format!(
                    "split node {} has non-positive cover",
                    idx
                )));
            }
            for child in [node.left, node.right] {
                match child {
                    Some(c) if c > idx && c < self.nodes.len() => {}
                    _ => {
                        return Err(ModelError::Invalid(format!(
                            "node {} has an invalid child reference",
                            idx
                        )))
                    }
                }
            }
        }
        Ok(())
    }

    fn children(&self, node: &Node) -> (usize, usize) {
        // validate() guarantees both children exist for split nodes
        (node.left.unwrap_or(0), node.right.unwrap_or(0))
    }

    /// Leaf value reached by `x`.
    pub fn predict(&self, x: &[f64]) -> f64 {
        let mut idx = 0;
        loop {
            let node = &self.nodes[idx];
            match node.feature {
                None => return node.leaf,
                Some(f) => {
                    let (left, right) = self.children(node);
                    idx = if node.goes_left(x[f]) { left } else { right };
                }
            }
        }
    }

    /// Cover-weighted mean of the leaf values.
    pub fn expected_value(&self) -> f64 {
        self.node_expectation(0)
    }

    fn node_expectation(&self, idx: usize) -> f64 {
        let node = &self.nodes[idx];
        if node.is_leaf() {
            return node.leaf;
        }
        let (left, right) = self.children(node);
        (self.nodes[left].cover * self.node_expectation(left)
            + self.nodes[right].cover * self.node_expectation(right))
            / node.cover
    }

    /// Adds the path-dependent TreeSHAP values of `x` into `phi`.
    pub fn shap_values(&self, x: &[f64], phi: &mut [f64]) {
        self.recurse(0, x, phi, &[], 1.0, 1.0, None);
    }

    #[allow(clippy::too_many_arguments)]
    fn recurse(
        &self,
        idx: usize,
        x: &[f64],
        phi: &mut [f64],
        parent_path: &[PathElement],
        zero_fraction: f64,
        one_fraction: f64,
        feature: Option<usize>,
    ) {
        let mut path = parent_path.to_vec();
        extend_path(&mut path, zero_fraction, one_fraction, feature);

        let node = &self.nodes[idx];
        let Some(split) = node.feature else {
            let depth = path.len() - 1;
            for i in 1..=depth {
                let weight = unwound_path_sum(&path, i);
                let el = path[i];
                if let Some(f) = el.feature {
                    phi[f] += weight * (el.one_fraction - el.zero_fraction) * node.leaf;
                }
            }
            return;
        };

        let (left, right) = self.children(node);
        let (hot, cold) = if node.goes_left(x[split]) {
            (left, right)
        } else {
            (right, left)
        };
        let hot_zero = self.nodes[hot].cover / node.cover;
        let cold_zero = self.nodes[cold].cover / node.cover;

        let mut incoming_zero = 1.0;
        let mut incoming_one = 1.0;
        // a feature seen earlier on the path is merged, not counted twice
        if let Some(k) = path.iter().position(|e| e.feature == Some(split)) {
            incoming_zero = path[k].zero_fraction;
            incoming_one = path[k].one_fraction;
            unwind_path(&mut path, k);
        }

        self.recurse(
            hot,
            x,
            phi,
            &path,
            hot_zero * incoming_zero,
            incoming_one,
            Some(split),
        );
        self.recurse(
            cold,
            x,
            phi,
            &path,
            cold_zero * incoming_zero,
            0.0,
            Some(split),
        );
    }
}

fn extend_path(
    path: &mut Vec<PathElement>,
    zero_fraction: f64,
    one_fraction: f64,
    feature: Option<usize>,
) {
    let depth = path.len();
    path.push(PathElement {
        feature,
        zero_fraction,
        one_fraction,
        pweight: if depth == 0 { 1.0 } else { 0.0 },
    });
    let denom = (depth + 1) as f64;
    for i in (0..depth).rev() {
        path[i + 1].pweight += one_fraction * path[i].pweight * (i + 1) as f64 / denom;
        path[i].pweight = zero_fraction * path[i].pweight * (depth - i) as f64 / denom;
    }
}

fn unwind_path(path: &mut Vec<PathElement>, index: usize) {
    let depth = path.len() - 1;
    let one_fraction = path[index].one_fraction;
    let zero_fraction = path[index].zero_fraction;
    let denom = (depth + 1) as f64;
    let mut next_one_portion = path[depth].pweight;

    for i in (0..depth).rev() {
        if one_fraction != 0.0 {
            let tmp = path[i].pweight;
            path[i].pweight = next_one_portion * denom / ((i + 1) as f64 * one_fraction);
            next_one_portion = tmp - path[i].pweight * zero_fraction * (depth - i) as f64 / denom;
        } else {
            path[i].pweight = path[i].pweight * denom / (zero_fraction * (depth - i) as f64);
        }
    }

    for i in index..depth {
        path[i].feature = path[i + 1].feature;
        path[i].zero_fraction = path[i + 1].zero_fraction;
        path[i].one_fraction = path[i + 1].one_fraction;
    }
    path.pop();
}

fn unwound_path_sum(path: &[PathElement], index: usize) -> f64 {
    let depth = path.len() - 1;
    let one_fraction = path[index].one_fraction;
    let zero_fraction = path[index].zero_fraction;
    let denom = (depth + 1) as f64;
    let mut next_one_portion = path[depth].pweight;
    let mut total = 0.0;

    for i in (0..depth).rev() {
        if one_fraction != 0.0 {
            let tmp = next_one_portion * denom / ((i + 1) as f64 * one_fraction);
            total += tmp;
            next_one_portion = path[i].pweight - tmp * zero_fraction * (depth - i) as f64 / denom;
        } else if zero_fraction != 0.0 {
            total += (path[i].pweight / zero_fraction) / ((depth - i) as f64 / denom);
        }
    }
    total
}
