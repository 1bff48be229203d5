//! Scenario catalog
//!
//! Named topologies shown in the scenario picker. Fixed scenarios carry a
//! labeled node list; the random scenario generates unlabeled points over the
//! plot square, keeping a margin away from the edges.

use crate::error::ScenarioError;
use crate::{Node, NodeId};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Side length of the square plot area.
pub const PLOT_SIZE: f64 = 500.0;

/// Distance kept between generated points and the plot edges.
pub const MARGIN: f64 = 40.0;

pub const MIN_NODES: usize = 3;
pub const MAX_NODES: usize = 30;
pub const DEFAULT_NODE_COUNT: usize = 10;

/// Scenario identifier as used on the wire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioId {
    #[default]
    Random,
    Logistics,
    Circuit,
    Delivery,
    RegionalTour,
}

impl ScenarioId {
    pub const ALL: [ScenarioId; 5] = [
        ScenarioId::Random,
        ScenarioId::Logistics,
        ScenarioId::Circuit,
        ScenarioId::Delivery,
        ScenarioId::RegionalTour,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ScenarioId::Random => "random",
            ScenarioId::Logistics => "logistics",
            ScenarioId::Circuit => "circuit",
            ScenarioId::Delivery => "delivery",
            ScenarioId::RegionalTour => "regional_tour",
        }
    }

    /// Catalog entry for this identifier.
    pub fn config(&self) -> &'static ScenarioConfig {
        match self {
            ScenarioId::Random => &RANDOM,
            ScenarioId::Logistics => &LOGISTICS,
            ScenarioId::Circuit => &CIRCUIT,
            ScenarioId::Delivery => &DELIVERY,
            ScenarioId::RegionalTour => &REGIONAL_TOUR,
        }
    }
}

impl std::fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ScenarioId {
    type Err = ScenarioError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ScenarioId::ALL
            .iter()
            .copied()
            .find(|id| id.as_str() == s)
            .ok_or_else(|| ScenarioError::Unknown(s.to_string()))
    }
}

/// One catalog entry.
#[derive(Debug)]
pub struct ScenarioConfig {
    pub id: ScenarioId,
    pub name: &'static str,
    pub description: &'static str,
    /// Natural-language framing sent to the model with the request
    pub context: &'static str,
    /// `true` when the node list below is used verbatim
    pub fixed_nodes: bool,
    layout: &'static [(f64, f64, &'static str)],
}

impl ScenarioConfig {
    /// Fixed node list with ids `0..N-1`. Empty for generated scenarios.
    pub fn fixed_node_list(&self) -> Vec<Node> {
        self.layout
            .iter()
            .enumerate()
            .map(|(i, &(x, y, label))| Node::labeled(i as NodeId, x, y, label))
            .collect()
    }

    /// Number of nodes a fresh topology of this scenario will have.
    pub fn node_count(&self, requested: usize) -> usize {
        if self.fixed_nodes {
            self.layout.len()
        } else {
            requested
        }
    }
}

/// Catalog summary served to clients.
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioSummary {
    pub id: ScenarioId,
    pub name: &'static str,
    pub description: &'static str,
    pub fixed_nodes: bool,
    pub node_count: Option<usize>,
}

impl From<&ScenarioConfig> for ScenarioSummary {
    fn from(config: &ScenarioConfig) -> Self {
        Self {
            id: config.id,
            name: config.name,
            description: config.description,
            fixed_nodes: config.fixed_nodes,
            node_count: config.fixed_nodes.then(|| config.layout.len()),
        }
    }
}

/// All scenarios in picker order.
pub fn catalog() -> Vec<&'static ScenarioConfig> {
    ScenarioId::ALL.iter().map(|id| id.config()).collect()
}

/// Check a requested random-topology size.
pub fn validate_node_count(count: usize) -> Result<usize, ScenarioError> {
    if (MIN_NODES..=MAX_NODES).contains(&count) {
        Ok(count)
    } else {
        Err(ScenarioError::NodeCount {
            min: MIN_NODES,
            max: MAX_NODES,
            got: count,
        })
    }
}

/// Unlabeled nodes with sequential ids, uniform over the plot square minus the
/// margin.
pub fn generate_random_nodes<R: Rng + ?Sized>(count: usize, rng: &mut R) -> Vec<Node> {
    (0..count)
        .map(|i| {
            let x = rng.gen_range(MARGIN..=PLOT_SIZE - MARGIN);
            let y = rng.gen_range(MARGIN..=PLOT_SIZE - MARGIN);
            Node::new(i as NodeId, x, y)
        })
        .collect()
}

/// Fresh node set for a scenario. `node_count` only applies to generated
/// scenarios.
pub fn build_nodes<R: Rng + ?Sized>(
    scenario: ScenarioId,
    node_count: usize,
    rng: &mut R,
) -> Result<Vec<Node>, ScenarioError> {
    let config = scenario.config();
    if config.fixed_nodes {
        Ok(config.fixed_node_list())
    } else {
        let count = validate_node_count(node_count)?;
        Ok(generate_random_nodes(count, rng))
    }
}

static RANDOM: ScenarioConfig = ScenarioConfig {
    id: ScenarioId::Random,
    name: "Random Nodes",
    description: "Randomly scattered points for free experimentation.",
    context: "A generic travelling-salesman instance over randomly placed points \
              in a 500 x 500 plane. Minimise the closed tour length.",
    fixed_nodes: false,
    layout: &[],
};

static LOGISTICS: ScenarioConfig = ScenarioConfig {
    id: ScenarioId::Logistics,
    name: "Logistics Network",
    description: "Truck loop between distribution hubs around a metropolitan area.",
    context: "A line-haul truck must visit every distribution hub in the metropolitan \
              logistics network once per shift and return to its origin. Energy is \
              the total driving distance; shorter loops cut fuel cost and CO2.",
    fixed_nodes: true,
    layout: &[
        (90.0, 130.0, "Central Warehouse"),
        (200.0, 75.0, "North Hub"),
        (345.0, 105.0, "East Depot"),
        (440.0, 225.0, "Airport Cargo"),
        (385.0, 365.0, "Harbor Terminal"),
        (245.0, 430.0, "South Plant"),
        (105.0, 345.0, "West DC"),
        (250.0, 250.0, "City Crossdock"),
    ],
};

static CIRCUIT: ScenarioConfig = ScenarioConfig {
    id: ScenarioId::Circuit,
    name: "Circuit Board Drilling",
    description: "Drill-head path across the holes of a printed circuit board.",
    context: "A CNC drill head must visit every hole on a printed circuit board exactly \
              once and come back to its parking position. Energy is the head travel \
              distance; shorter paths increase board throughput.",
    fixed_nodes: true,
    layout: &[
        (60.0, 60.0, "H1"),
        (180.0, 60.0, "H2"),
        (300.0, 60.0, "H3"),
        (440.0, 60.0, "H4"),
        (440.0, 200.0, "H5"),
        (300.0, 200.0, "H6"),
        (180.0, 200.0, "H7"),
        (60.0, 200.0, "H8"),
        (60.0, 380.0, "H9"),
        (250.0, 440.0, "H10"),
        (440.0, 380.0, "H11"),
        (250.0, 310.0, "H12"),
    ],
};

static DELIVERY: ScenarioConfig = ScenarioConfig {
    id: ScenarioId::Delivery,
    name: "Last-Mile Delivery",
    description: "Courier round from a depot through customer drop-offs.",
    context: "A courier leaves the depot, delivers parcels to every customer address \
              once and returns. Energy is the distance ridden; shorter rounds mean \
              more deliveries per day.",
    fixed_nodes: true,
    layout: &[
        (250.0, 250.0, "Depot"),
        (120.0, 90.0, "Customer A"),
        (330.0, 70.0, "Customer B"),
        (445.0, 170.0, "Customer C"),
        (410.0, 330.0, "Customer D"),
        (300.0, 445.0, "Customer E"),
        (150.0, 420.0, "Customer F"),
        (55.0, 290.0, "Customer G"),
        (75.0, 160.0, "Customer H"),
    ],
};

static REGIONAL_TOUR: ScenarioConfig = ScenarioConfig {
    id: ScenarioId::RegionalTour,
    name: "Regional Tour",
    description: "Sightseeing tour through neighbouring cities of one region.",
    context: "A tour operator plans a round trip that visits each city of the region \
              once and ends where it started. Energy is the total travel distance \
              between cities.",
    fixed_nodes: true,
    layout: &[
        (230.0, 300.0, "Osaka"),
        (290.0, 195.0, "Kyoto"),
        (325.0, 330.0, "Nara"),
        (140.0, 310.0, "Kobe"),
        (190.0, 440.0, "Wakayama"),
        (345.0, 165.0, "Otsu"),
        (60.0, 260.0, "Himeji"),
    ],
};
