//! Embedded single-page client.
//!
//! Creates a session, follows its snapshot stream and fetches the rendered
//! frame whenever the cursor moves. All state lives on the server.

pub const INDEX_HTML: &str = r##"<!doctype html>
<html lang="en">
<head>
<meta charset="utf-8">
<title>Quantum Route Viz</title>
<style>
  body { background: #020617; color: #e2e8f0; font-family: sans-serif; margin: 0; display: flex; gap: 24px; padding: 24px; }
  #controls { width: 280px; display: flex; flex-direction: column; gap: 10px; }
  label { font-size: 12px; color: #94a3b8; display: flex; flex-direction: column; gap: 4px; }
  input, select, button { background: #0f172a; color: #e2e8f0; border: 1px solid #334155; padding: 6px; border-radius: 4px; }
  button:disabled { opacity: 0.5; }
  #error { display: none; background: #7f1d1d; padding: 8px; border-radius: 4px; }
  #stats td { padding: 2px 8px; font-size: 13px; }
  #issues { font-size: 12px; color: #fbbf24; }
  #summary { font-size: 13px; color: #cbd5e1; max-width: 500px; }
</style>
</head>
<body>
<div id="controls">
  <label>Scenario <select id="scenario"></select></label>
  <label>Nodes <input id="nodes" type="number" min="3" max="30" value="10"></label>
  <button id="reset">Regenerate</button>
  <label>Start node <select id="start"></select></label>
  <label>Algorithm
    <select id="algorithm">
      <option value="quantum_annealing">Quantum annealing</option>
      <option value="simulated_annealing">Simulated annealing</option>
      <option value="greedy">Greedy</option>
      <option value="random">Random</option>
    </select>
  </label>
  <label>Steps <input id="steps" type="number" min="1" value="1000"></label>
  <label>Initial temperature <input id="temp" type="number" min="0.1" step="0.1" value="100"></label>
  <label>Tunneling rate <input id="rate" type="number" min="0" max="1" step="0.05" value="0.3"></label>
  <button id="optimize">Optimize</button>
  <div>
    <button id="toggle">Play / Pause</button>
    <button id="skip">Skip to end</button>
  </div>
  <div id="error"><span id="error-text"></span> <button id="dismiss">Dismiss</button></div>
  <div id="issues"></div>
</div>
<div>
  <div id="plot"></div>
  <table id="stats"></table>
  <p id="summary"></p>
</div>
<script>
const $ = (id) => document.getElementById(id);
let session = null;
let lastCursor = undefined;

async function call(method, path, body) {
  const res = await fetch(path, {
    method,
    headers: body ? { "content-type": "application/json" } : {},
    body: body ? JSON.stringify(body) : undefined,
  });
  const data = await res.json().catch(() => ({}));
  if (!res.ok) { showError(data.error || res.statusText); return null; }
  return data;
}

function showError(message) {
  $("error-text").textContent = message;
  $("error").style.display = message ? "block" : "none";
}

async function refreshFrame() {
  const res = await fetch(`/api/v1/sessions/${session}/frame.svg`);
  $("plot").innerHTML = await res.text();
}

function render(s) {
  $("scenario").value = s.scenario;
  $("nodes").value = s.node_count;
  const start = $("start");
  if (start.options.length !== s.nodes.length) {
    start.innerHTML = s.nodes.map(n => `<option value="${n.id}">${n.label ?? "#" + n.id}</option>`).join("");
  }
  start.value = s.start_node_id;
  for (const id of ["optimize", "start", "steps", "temp", "rate", "algorithm"]) $(id).disabled = s.loading;
  $("optimize").textContent = s.loading ? "Optimizing..." : "Optimize";
  showError(s.error ? s.error.message : "");
  $("issues").textContent = s.issues.length ? `${s.issues.length} data-quality warning(s)` : "";
  $("summary").textContent = s.summary ?? "";
  const st = s.stats;
  $("stats").innerHTML = st ? `
    <tr><td>Frame</td><td>${st.cursor + 1} / ${st.frame_count}</td></tr>
    <tr><td>Step</td><td>${st.step}</td></tr>
    <tr><td>Current energy</td><td>${st.current_energy.toFixed(2)}</td></tr>
    <tr><td>Best energy</td><td>${st.best_energy.toFixed(2)}</td></tr>
    <tr><td>Tunneling events</td><td>${st.cumulative_tunneling}</td></tr>
    <tr><td>Improvement</td><td>${st.improvement_percent.toFixed(1)}%</td></tr>
    <tr><td>Converged at step</td><td>${st.convergence_step}</td></tr>
    <tr><td>Status</td><td>${s.status}</td></tr>` : `<tr><td>Status</td><td>${s.status}</td></tr>`;
  if (s.cursor !== lastCursor || s.cursor === null) { lastCursor = s.cursor; refreshFrame(); }
}

async function init() {
  const scenarios = await call("GET", "/api/v1/scenarios");
  $("scenario").innerHTML = scenarios.map(s => `<option value="${s.id}">${s.name}</option>`).join("");
  const snapshot = await call("POST", "/api/v1/sessions", {});
  session = snapshot.session_id;
  render(snapshot);
  const events = new EventSource(`/api/v1/sessions/${session}/events`);
  events.addEventListener("snapshot", (e) => render(JSON.parse(e.data)));
  window.addEventListener("beforeunload", () => fetch(`/api/v1/sessions/${session}`, { method: "DELETE", keepalive: true }));

  const base = () => `/api/v1/sessions/${session}`;
  $("scenario").onchange = () => call("POST", `${base()}/scenario`, { scenario: $("scenario").value, node_count: Number($("nodes").value) });
  $("nodes").onchange = () => call("POST", `${base()}/scenario`, { scenario: $("scenario").value, node_count: Number($("nodes").value) });
  $("reset").onclick = () => call("POST", `${base()}/reset`);
  $("start").onchange = () => call("PUT", `${base()}/start-node`, { node_id: Number($("start").value) });
  const params = () => call("PUT", `${base()}/params`, {
    steps: Number($("steps").value),
    init_temp: Number($("temp").value),
    tunneling_rate: Number($("rate").value),
    algorithm: $("algorithm").value,
  });
  for (const id of ["steps", "temp", "rate", "algorithm"]) $(id).onchange = params;
  $("optimize").onclick = () => call("POST", `${base()}/optimize`);
  $("toggle").onclick = () => call("POST", `${base()}/playback/toggle`);
  $("skip").onclick = () => call("POST", `${base()}/playback/skip`);
  $("dismiss").onclick = () => call("POST", `${base()}/error/dismiss`);
}

init();
</script>
</body>
</html>
"##;
