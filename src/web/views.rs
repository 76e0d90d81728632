// Server-rendered HTML for the leaderboard pages.
//
// Plain string building; every value that came from Facebook or the URL
// goes through `escape` before it lands in markup.

use std::fmt::Write;

use chrono::{DateTime, Utc};

use super::auth::SessionUser;
use crate::ranking::{RankedEntry, Ranking};
use crate::snapshots::{CrowdView, DataTree, GroupView, Liveness};

/// Per-request values every page shows in its header and footer.
pub struct PageContext {
    pub user: Option<SessionUser>,
    pub liveness: Liveness,
}

pub fn escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn ago(at: DateTime<Utc>) -> String {
    let secs = (Utc::now() - at).num_seconds().max(0);
    match secs {
        0..=59 => format!("{secs}s ago"),
        60..=3599 => format!("{}m ago", secs / 60),
        _ => format!("{}h ago", secs / 3600),
    }
}

fn layout(title: &str, ctx: &PageContext, body: &str) -> String {
    let account = match &ctx.user {
        Some(user) => format!(
            r#"Logged in as {} · <a href="/logout">Log out</a>"#,
            escape(&user.name)
        ),
        None => r#"<a href="/auth/facebook">Log in with Facebook</a>"#.to_string(),
    };
    let status = match ctx.liveness {
        Liveness::NotStarted => "Data collection has not started yet".to_string(),
        Liveness::LastFeed(at) => format!("Last feed fetched {}", ago(at)),
    };

    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>{title} · crowdstats</title>
<style>
body {{ font-family: system-ui, sans-serif; max-width: 960px; margin: 0 auto; padding: 1rem; }}
header, footer {{ display: flex; justify-content: space-between; color: #555; }}
table {{ border-collapse: collapse; width: 100%; }}
td, th {{ padding: .3rem .5rem; text-align: left; border-bottom: 1px solid #eee; }}
.bar {{ background: #4a76a8; height: .6rem; }}
img.avatar {{ width: 32px; height: 32px; border-radius: 50%; vertical-align: middle; }}
</style>
</head>
<body>
<header><a href="/">crowdstats</a><span>{account}</span></header>
<main>
<h1>{title}</h1>
{body}
</main>
<footer><span>{status}</span></footer>
</body>
</html>
"#,
        title = escape(title),
    )
}

pub fn render_index(tree: &DataTree, ctx: &PageContext) -> String {
    let mut body = String::new();
    if tree.is_empty() {
        body.push_str("<p>No group data yet. Check back after the first poll completes.</p>");
    } else {
        body.push_str("<ul>");
        for crowd in &tree.crowds {
            let _ = write!(
                body,
                r#"<li><a href="/group/{key}">{name}</a> ({count} groups)</li>"#,
                key = escape(&crowd.key),
                name = escape(&crowd.name),
                count = crowd.groups.len(),
            );
        }
        body.push_str("</ul>");
    }
    layout("Crowds", ctx, &body)
}

pub fn render_crowd(crowd: &CrowdView, ctx: &PageContext) -> String {
    let mut body = String::from("<ul>");
    for group in &crowd.groups {
        let snap = &group.snapshot;
        let _ = write!(
            body,
            r#"<li><a href="/group/{crowd}/{key}">{name}</a> · updated {updated}</li>"#,
            crowd = escape(&crowd.key),
            key = escape(&group.key),
            name = escape(&snap.group_name),
            updated = ago(snap.last_updated),
        );
    }
    body.push_str("</ul>");
    layout(&crowd.name, ctx, &body)
}

fn ranking_table(heading: &str, unit: &str, ranking: &Ranking, link_base: &str) -> String {
    let mut out = format!("<h2>{}</h2>", escape(heading));
    if ranking.is_empty() {
        out.push_str("<p>Nobody yet.</p>");
        return out;
    }
    out.push_str("<table><tr><th>#</th><th>Who</th><th>");
    out.push_str(&escape(unit));
    out.push_str("</th><th></th></tr>");
    for (i, entry) in ranking.entries.iter().enumerate() {
        let _ = write!(
            out,
            r#"<tr><td>{rank}</td><td>{avatar}<a href="{base}/{id}">{name}</a></td><td>{count}</td><td><div class="bar" style="width: {pct}%"></div></td></tr>"#,
            rank = i + 1,
            avatar = avatar(entry),
            base = link_base,
            id = escape(&entry.identity.id),
            name = escape(&entry.identity.name),
            count = entry.count,
            pct = entry.percent,
        );
    }
    out.push_str("</table>");
    out
}

fn avatar(entry: &RankedEntry) -> String {
    match &entry.identity.picture {
        Some(url) => format!(r#"<img class="avatar" src="{}" alt=""> "#, escape(url)),
        None => String::new(),
    }
}

pub fn render_group(crowd: &CrowdView, group: &GroupView, ctx: &PageContext) -> String {
    let snap = &group.snapshot;
    let link_base = format!("/group/{}/{}", escape(&crowd.key), escape(&group.key));
    let mut body = format!(
        r#"<p><a href="/group/{crowd_key}">{crowd_name}</a> · last updated {updated}</p>"#,
        crowd_key = escape(&crowd.key),
        crowd_name = escape(&snap.crowd_name),
        updated = ago(snap.last_updated),
    );
    body.push_str(&ranking_table(
        "Top posters",
        "Posts",
        &snap.top_posters,
        &link_base,
    ));
    body.push_str(&ranking_table(
        "Top commenters",
        "Comments",
        &snap.top_commenters,
        &link_base,
    ));
    layout(&snap.group_name, ctx, &body)
}

/// Detail page for one ranked user. `None` when the id is in neither ranking.
pub fn render_user(
    crowd: &CrowdView,
    group: &GroupView,
    user_id: &str,
    ctx: &PageContext,
) -> Option<String> {
    let snap = &group.snapshot;
    let as_poster = snap.top_posters.entry_for(user_id);
    let as_commenter = snap.top_commenters.entry_for(user_id);
    let identity = as_poster.or(as_commenter)?.identity.clone();

    let mut body = format!(
        r#"<p><a href="/group/{c}/{g}">{group_name}</a> in {crowd_name}</p>"#,
        c = escape(&crowd.key),
        g = escape(&group.key),
        group_name = escape(&snap.group_name),
        crowd_name = escape(&snap.crowd_name),
    );
    if let Some(url) = &identity.picture {
        let _ = write!(body, r#"<p><img src="{}" alt=""></p>"#, escape(url));
    }

    body.push_str("<ul>");
    if let Some(entry) = as_poster {
        let rank = snap.top_posters.position(user_id).unwrap_or(0) + 1;
        let _ = write!(
            body,
            "<li>#{rank} poster with {} posts ({}% of the top poster)</li>",
            entry.count, entry.percent
        );
    }
    if let Some(entry) = as_commenter {
        let rank = snap.top_commenters.position(user_id).unwrap_or(0) + 1;
        let _ = write!(
            body,
            "<li>#{rank} commenter with {} comments ({}% of the top commenter)</li>",
            entry.count, entry.percent
        );
    }
    body.push_str("</ul>");

    let posts = snap.posts_by(user_id);
    if !posts.is_empty() {
        body.push_str("<h2>Recent posts</h2><ul>");
        for post in posts {
            let message = post.message.as_deref().unwrap_or("(no text)");
            let when = post.created_time.as_deref().unwrap_or("");
            let _ = write!(
                body,
                "<li>{} <small>{} · {} comments</small></li>",
                escape(message),
                escape(when),
                post.comments().len(),
            );
        }
        body.push_str("</ul>");
    }

    let _ = write!(body, "<p><small>Data from {}</small></p>", ago(snap.last_updated));
    Some(layout(&identity.name, ctx, &body))
}

pub fn render_please_login(ctx: &PageContext) -> String {
    layout(
        "Please log in",
        ctx,
        r#"<p>This site shows activity from Facebook groups, so you need to log in with Facebook first.</p>
<p><a href="/auth/facebook">Log in with Facebook</a></p>"#,
    )
}

pub fn render_not_found(url: &str, message: &str, ctx: &PageContext) -> String {
    let body = format!(
        r#"<p>{}</p><p><code>{}</code></p><p><a href="/">Back to all crowds</a></p>"#,
        escape(message),
        escape(url)
    );
    layout("Not found", ctx, &body)
}

pub fn render_login_failed(reason: &str, ctx: &PageContext) -> String {
    let body = format!(
        r#"<p>Facebook login did not complete: {}</p><p><a href="/auth/facebook">Try again</a></p>"#,
        escape(reason)
    );
    layout("Login failed", ctx, &body)
}
