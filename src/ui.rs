use crate::models::{ChartPoint, Dashboard, HabitSummary};
use crate::session::Flash;

pub fn render_index(dashboard: &Dashboard, flash: Option<&Flash>, csrf_token: &str) -> String {
    let date = dashboard
        .date
        .map(|date| date.to_string())
        .unwrap_or_else(|| "--".to_string());
    let flash_html = flash
        .map(|flash| {
            format!(
                r#"<div class="flash" data-type="{}">{}</div>"#,
                flash.kind.as_str(),
                escape_html(&flash.message)
            )
        })
        .unwrap_or_default();
    let forecast = dashboard
        .forecast
        .map(|value| format!("{value}%"))
        .unwrap_or_else(|| "--".to_string());

    let csrf = escape_html(csrf_token);
    let total = dashboard.total.to_string();
    let completed = dashboard.completed.to_string();
    let missed = dashboard.missed.to_string();
    let efficiency = dashboard.efficiency.to_string();
    let chart = render_chart(&dashboard.chart, dashboard.forecast);
    let habits = render_habits(&dashboard.habits, csrf_token);

    fill_slots(
        INDEX_HTML,
        &[
            ("CSRF", csrf.as_str()),
            ("DATE", date.as_str()),
            ("FLASH", flash_html.as_str()),
            ("TOTAL", total.as_str()),
            ("COMPLETED", completed.as_str()),
            ("MISSED", missed.as_str()),
            ("EFFICIENCY", efficiency.as_str()),
            ("FORECAST", forecast.as_str()),
            ("CHART", chart.as_str()),
            ("HABITS", habits.as_str()),
        ],
    )
}

/// Replaces `{{NAME}}` slots in a single pass. Inserted text is never rescanned,
/// so user content that looks like a slot stays literal.
fn fill_slots(template: &str, slots: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let slot = after.find("}}").and_then(|end| {
            slots
                .iter()
                .find(|(name, _)| *name == &after[..end])
                .map(|(_, value)| (end, *value))
        });
        match slot {
            Some((end, value)) => {
                out.push_str(value);
                rest = &after[end + 2..];
            }
            None => {
                out.push_str("{{");
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

pub fn render_sign_in() -> String {
    SIGN_IN_HTML.to_string()
}

/// Escapes text for HTML element content and quoted attribute values.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}

fn render_habits(habits: &[HabitSummary], csrf_token: &str) -> String {
    if habits.is_empty() {
        return r#"<li class="empty">No habits yet. Add one below.</li>"#.to_string();
    }

    let csrf = escape_html(csrf_token);
    let mut html = String::new();
    for habit in habits {
        let (action, label) = if habit.done_today {
            ("undo", "Undo")
        } else {
            ("complete", "Done")
        };
        let description = habit
            .description
            .as_deref()
            .map(|d| format!(r#"<p class="desc">{}</p>"#, escape_html(d)))
            .unwrap_or_default();
        html.push_str(&format!(
            r#"<li class="habit{done}" draggable="true" data-id="{id}">
  <span class="handle" aria-hidden="true">&#8942;&#8942;</span>
  <div class="body">
    <strong>{title}</strong> <span class="tag">{frequency}</span>
    {description}
    <p class="meta">Streak {current} &middot; best {longest} &middot; next {next}</p>
  </div>
  <form method="post" action="/">
    <input type="hidden" name="csrf_token" value="{csrf}" />
    <input type="hidden" name="habit_id" value="{id}" />
    <button name="action" value="{action}" type="submit">{label}</button>
    <button name="action" value="delete" type="submit" class="ghost">Delete</button>
  </form>
  <a class="ghost" href="/api/history?id={id}&amp;export=csv">CSV</a>
</li>
"#,
            done = if habit.done_today { " done" } else { "" },
            id = habit.id,
            title = escape_html(&habit.title),
            frequency = habit.frequency.as_str(),
            current = habit.current_streak,
            longest = habit.longest_streak,
            next = habit.next_available,
        ));
    }
    html
}

/// Bar chart of the last days plus a hatched forecast bar.
fn render_chart(points: &[ChartPoint], forecast: Option<u8>) -> String {
    if points.is_empty() {
        return r#"<text class="label" x="50%" y="50%" text-anchor="middle">No data yet</text>"#
            .to_string();
    }

    const HEIGHT: f64 = 160.0;
    const BAR: f64 = 40.0;
    const GAP: f64 = 24.0;

    let mut svg = String::new();
    let bars = points
        .iter()
        .map(|point| (point.label.as_str(), point.value, "bar"))
        .chain(forecast.map(|value| ("next", value, "bar forecast")));
    for (index, (label, value, class)) in bars.enumerate() {
        let x = GAP + index as f64 * (BAR + GAP);
        let h = HEIGHT * f64::from(value) / 100.0;
        let y = 20.0 + HEIGHT - h;
        svg.push_str(&format!(
            r#"<rect class="{class}" x="{x:.1}" y="{y:.1}" width="{BAR}" height="{h:.1}" rx="6" /><text class="label" x="{cx:.1}" y="{ly:.1}" text-anchor="middle">{value}%</text><text class="label" x="{cx:.1}" y="200" text-anchor="middle">{label}</text>"#,
            cx = x + BAR / 2.0,
            ly = y - 6.0,
        ));
    }
    svg
}

const SIGN_IN_HTML: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="UTF-8" />
  <meta name="viewport" content="width=device-width, initial-scale=1.0" />
  <title>Habits</title>
  <style>
    body { font-family: system-ui, sans-serif; background: #f4f1ea; display: grid; place-items: center; min-height: 100vh; margin: 0; }
    form { background: white; padding: 32px; border-radius: 18px; display: grid; gap: 12px; box-shadow: 0 18px 40px rgba(0, 0, 0, 0.08); }
    input, button { font: inherit; padding: 10px 14px; border-radius: 10px; border: 1px solid #d8d2c4; }
    button { background: #2f4858; color: white; border: none; cursor: pointer; }
  </style>
</head>
<body>
  <form method="post" action="/session">
    <h1>Habits</h1>
    <label for="username">Name</label>
    <input id="username" name="username" required maxlength="64" />
    <button type="submit">Continue</button>
  </form>
</body>
</html>
"#;

const INDEX_HTML: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="UTF-8" />
  <meta name="viewport" content="width=device-width, initial-scale=1.0" />
  <meta name="csrf-token" content="{{CSRF}}" />
  <title>Habits &middot; {{DATE}}</title>
  <style>
    :root { --ink: #2b2a28; --accent: #3d8361; --muted: #8b857d; --card: #ffffff; }
    * { box-sizing: border-box; }
    body { margin: 0; font-family: system-ui, sans-serif; color: var(--ink); background: #f4f1ea; padding: 32px 18px; }
    main { width: min(860px, 100%); margin: 0 auto; display: grid; gap: 24px; }
    .stats { display: grid; grid-template-columns: repeat(auto-fit, minmax(140px, 1fr)); gap: 12px; }
    .stat { background: var(--card); border-radius: 16px; padding: 16px; }
    .stat .label { display: block; font-size: 0.8rem; text-transform: uppercase; letter-spacing: 0.1em; color: var(--muted); }
    .stat .value { font-size: 1.6rem; font-weight: 600; }
    .flash { padding: 12px 16px; border-radius: 12px; background: #e3f1e8; }
    .flash[data-type="error"] { background: #f8dcd7; }
    ul.habits { list-style: none; padding: 0; margin: 0; display: grid; gap: 10px; }
    .habit { display: flex; align-items: center; gap: 14px; background: var(--card); border-radius: 14px; padding: 12px 16px; }
    .habit.done { opacity: 0.7; }
    .habit .body { flex: 1; }
    .habit .handle { cursor: grab; color: var(--muted); }
    .habit .desc, .habit .meta { margin: 4px 0 0; font-size: 0.9rem; color: var(--muted); }
    .tag { font-size: 0.75rem; background: #ece6da; border-radius: 999px; padding: 2px 8px; }
    button { font: inherit; border: none; border-radius: 999px; padding: 8px 14px; background: var(--accent); color: white; cursor: pointer; }
    .ghost { background: transparent; color: var(--muted); }
    .chart { background: var(--card); border-radius: 16px; padding: 12px; }
    .chart svg { width: 100%; height: 220px; }
    .bar { fill: var(--accent); }
    .bar.forecast { fill: #b9d7c6; }
    .label { fill: var(--muted); font-size: 11px; }
    form.create { display: flex; flex-wrap: wrap; gap: 8px; }
    form.create input, form.create select { font: inherit; padding: 8px 12px; border-radius: 10px; border: 1px solid #d8d2c4; }
  </style>
</head>
<body>
  <main>
    <h1>Today &middot; {{DATE}}</h1>
    {{FLASH}}
    <section class="stats">
      <div class="stat"><span class="label">Habits</span><span class="value">{{TOTAL}}</span></div>
      <div class="stat"><span class="label">Done</span><span class="value">{{COMPLETED}}</span></div>
      <div class="stat"><span class="label">Missed</span><span class="value">{{MISSED}}</span></div>
      <div class="stat"><span class="label">Efficiency</span><span class="value">{{EFFICIENCY}}%</span></div>
      <div class="stat"><span class="label">Forecast</span><span class="value">{{FORECAST}}</span></div>
    </section>
    <section class="chart">
      <svg viewBox="0 0 540 210" role="img" aria-label="Efficiency over the last 7 days">{{CHART}}</svg>
    </section>
    <ul class="habits" id="habits">
{{HABITS}}
    </ul>
    <form class="create" method="post" action="/">
      <input type="hidden" name="csrf_token" value="{{CSRF}}" />
      <input type="hidden" name="action" value="create" />
      <input name="title" placeholder="New habit" required maxlength="255" />
      <input name="description" placeholder="Description (optional)" />
      <select name="frequency">
        <option value="daily">Daily</option>
        <option value="weekly">Weekly</option>
        <option value="monthly">Monthly</option>
      </select>
      <button type="submit">Add</button>
    </form>
  </main>
  <script>
    const list = document.getElementById('habits');
    const csrf = document.querySelector('meta[name="csrf-token"]').content;
    let dragged = null;

    list.addEventListener('dragstart', (event) => {
      dragged = event.target.closest('.habit');
    });

    list.addEventListener('dragover', (event) => {
      event.preventDefault();
      const target = event.target.closest('.habit');
      if (!dragged || !target || target === dragged) {
        return;
      }
      const rect = target.getBoundingClientRect();
      const after = event.clientY > rect.top + rect.height / 2;
      list.insertBefore(dragged, after ? target.nextSibling : target);
    });

    list.addEventListener('drop', async (event) => {
      event.preventDefault();
      dragged = null;
      const order = Array.from(list.querySelectorAll('.habit')).map((item) => Number(item.dataset.id));
      const res = await fetch('/api/habits/reorder', {
        method: 'POST',
        headers: { 'content-type': 'application/json' },
        body: JSON.stringify({ order, csrf_token: csrf })
      });
      const data = await res.json().catch(() => ({ ok: false }));
      if (!data.ok) {
        window.location.reload();
      }
    });
  </script>
</body>
</html>
"#;
