//! SVG rendering of one playback frame
//!
//! Draws the closed route as one line per leg with an arrowhead marking the
//! travel direction, then the nodes on top. Legs touching an id that is not in
//! the node set are skipped.

use crate::iteration::IterationFrame;
use crate::scenario::PLOT_SIZE;
use crate::{Node, NodeId};
use std::collections::HashMap;
use std::fmt::Write;

/// Drawing options.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderOptions {
    pub width: f64,
    pub height: f64,
    pub node_radius: f64,
    pub show_labels: bool,
    /// Overlay the best route behind the current one
    pub show_best_route: bool,
    pub start_node_id: Option<NodeId>,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            width: PLOT_SIZE,
            height: PLOT_SIZE,
            node_radius: 7.0,
            show_labels: true,
            show_best_route: true,
            start_node_id: Some(0),
        }
    }
}

const ROUTE_COLOR: &str = "#22d3ee";
const TUNNELING_COLOR: &str = "#c084fc";
const BEST_COLOR: &str = "#4ade80";
const NODE_COLOR: &str = "#e2e8f0";
const START_COLOR: &str = "#f59e0b";

/// Render nodes and, if given, the frame's routes.
pub fn render_svg(nodes: &[Node], frame: Option<&IterationFrame>, options: &RenderOptions) -> String {
    let mut svg = String::with_capacity(4096);
    // Writing into a String cannot fail
    let _ = write_svg(&mut svg, nodes, frame, options);
    svg
}

fn write_svg(
    out: &mut String,
    nodes: &[Node],
    frame: Option<&IterationFrame>,
    options: &RenderOptions,
) -> std::fmt::Result {
    let route_color = match frame {
        Some(f) if f.tunneling => TUNNELING_COLOR,
        _ => ROUTE_COLOR,
    };

    writeln!(
        out,
        r#"<svg xmlns="http://www.w3.org/2000/svg" width="{w}" height="{h}" viewBox="0 0 {w} {h}">"#,
        w = options.width,
        h = options.height
    )?;
    writeln!(out, "<defs>")?;
    for (id, color) in [("arrow", route_color), ("arrow-best", BEST_COLOR)] {
        writeln!(
            out,
            r#"<marker id="{id}" viewBox="0 0 10 10" refX="10" refY="5" markerWidth="6" markerHeight="6" orient="auto-start-reverse"><path d="M 0 0 L 10 5 L 0 10 z" fill="{color}"/></marker>"#
        )?;
    }
    writeln!(out, "</defs>")?;
    writeln!(
        out,
        r##"<rect width="100%" height="100%" fill="#0f172a"/>"##
    )?;

    let index: HashMap<NodeId, &Node> = nodes.iter().map(|n| (n.id, n)).collect();

    if let Some(frame) = frame {
        if options.show_best_route && frame.best_route != frame.current_route {
            write_route(out, &frame.best_route, &index, options, "best", BEST_COLOR, "arrow-best")?;
        }
        write_route(out, &frame.current_route, &index, options, "current", route_color, "arrow")?;
    }

    for node in nodes {
        let is_start = options.start_node_id == Some(node.id);
        let fill = if is_start { START_COLOR } else { NODE_COLOR };
        writeln!(
            out,
            r#"<circle class="node" data-id="{}" cx="{:.2}" cy="{:.2}" r="{}" fill="{}"/>"#,
            node.id, node.x, node.y, options.node_radius, fill
        )?;
        if options.show_labels {
            writeln!(
                out,
                r##"<text x="{:.2}" y="{:.2}" fill="#94a3b8" font-size="11" font-family="sans-serif">{}</text>"##,
                node.x + options.node_radius + 3.0,
                node.y - options.node_radius,
                escape_xml(&node.display_name())
            )?;
        }
    }

    writeln!(out, "</svg>")
}

fn write_route(
    out: &mut String,
    route: &[NodeId],
    index: &HashMap<NodeId, &Node>,
    options: &RenderOptions,
    class: &str,
    color: &str,
    marker: &str,
) -> std::fmt::Result {
    if route.len() < 2 {
        return Ok(());
    }
    let dashed = if class == "best" { r#" stroke-dasharray="4 4" opacity="0.6""# } else { "" };

    for (i, id) in route.iter().enumerate() {
        let next = route[(i + 1) % route.len()];
        let (Some(a), Some(b)) = (index.get(id), index.get(&next)) else {
            continue;
        };
        let (x2, y2) = shorten(a, b, options.node_radius + 2.0);
        writeln!(
            out,
            r#"<line class="{class}" x1="{:.2}" y1="{:.2}" x2="{:.2}" y2="{:.2}" stroke="{color}" stroke-width="2"{dashed} marker-end="url(#{marker})"/>"#,
            a.x, a.y, x2, y2
        )?;
    }
    Ok(())
}

/// End point of `a -> b` pulled back by `by`, so arrowheads stay outside the
/// node circle.
fn shorten(a: &Node, b: &Node, by: f64) -> (f64, f64) {
    let len = a.distance_to(b);
    if len <= by {
        return (b.x, b.y);
    }
    let t = (len - by) / len;
    (a.x + (b.x - a.x) * t, a.y + (b.y - a.y) * t)
}

fn escape_xml(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nodes() -> Vec<Node> {
        vec![
            Node::labeled(0, 50.0, 50.0, "Depot"),
            Node::new(1, 150.0, 50.0),
            Node::new(2, 150.0, 150.0),
        ]
    }

    fn frame(route: Vec<NodeId>, tunneling: bool) -> IterationFrame {
        IterationFrame {
            step: 0,
            current_route: route.clone(),
            current_energy: 1.0,
            best_route: route,
            best_energy: 1.0,
            tunneling,
        }
    }

    #[test]
    fn test_nodes_only() {
        let svg = render_svg(&nodes(), None, &RenderOptions::default());
        assert!(svg.starts_with("<svg"));
        assert!(svg.trim_end().ends_with("</svg>"));
        assert_eq!(svg.matches("<circle").count(), 3);
        assert_eq!(svg.matches("<line").count(), 0);
        assert!(svg.contains(">Depot<"));
    }

    #[test]
    fn test_closed_route_has_one_leg_per_node() {
        let f = frame(vec![0, 1, 2], false);
        let svg = render_svg(&nodes(), Some(&f), &RenderOptions::default());
        assert_eq!(svg.matches(r#"class="current""#).count(), 3);
        assert_eq!(svg.matches("marker-end").count(), 3);
        assert!(svg.contains(ROUTE_COLOR));
    }

    #[test]
    fn test_tunneling_frame_changes_color() {
        let f = frame(vec![0, 1, 2], true);
        let svg = render_svg(&nodes(), Some(&f), &RenderOptions::default());
        assert!(svg.contains(TUNNELING_COLOR));
    }

    #[test]
    fn test_unknown_ids_skip_legs() {
        let f = frame(vec![0, 1, 9], false);
        let svg = render_svg(&nodes(), Some(&f), &RenderOptions::default());
        // Only 0 -> 1 survives
        assert_eq!(svg.matches(r#"class="current""#).count(), 1);
    }

    #[test]
    fn test_best_route_overlay() {
        let mut f = frame(vec![0, 1, 2], false);
        f.best_route = vec![0, 2, 1];
        let svg = render_svg(&nodes(), Some(&f), &RenderOptions::default());
        assert_eq!(svg.matches(r#"class="best""#).count(), 3);

        let options = RenderOptions {
            show_best_route: false,
            ..Default::default()
        };
        let svg = render_svg(&nodes(), Some(&f), &options);
        assert_eq!(svg.matches(r#"class="best""#).count(), 0);
    }

    #[test]
    fn test_labels_are_escaped() {
        let nodes = vec![Node::labeled(0, 1.0, 1.0, "A&B <hub>")];
        let svg = render_svg(&nodes, None, &RenderOptions::default());
        assert!(svg.contains("A&amp;B &lt;hub&gt;"));
    }

    #[test]
    fn test_shorten_stops_before_node() {
        let a = Node::new(0, 0.0, 0.0);
        let b = Node::new(1, 100.0, 0.0);
        let (x, y) = shorten(&a, &b, 10.0);
        assert!((x - 90.0).abs() < 1e-9);
        assert_eq!(y, 0.0);
    }
}
