//! Template sources rendered by [`super::HandlebarsTemplate`].
//!
//! Values are inserted verbatim; callers escape them for their context.

/// The packaged HTML document.
pub const DOCUMENT_TEMPLATE: &str = r##"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>{{title}}</title>
{{#if icon_data_url}}<link rel="icon" href="{{icon_data_url}}">{{/if}}
<style>
html, body { margin: 0; width: 100%; height: 100%; overflow: hidden; background: {{background}}; color: {{foreground}}; }
#app { position: absolute; inset: 0; }
#loading { position: absolute; inset: 0; display: flex; flex-direction: column; align-items: center; justify-content: center; font-family: sans-serif; background: {{background}}; }
#progress { width: 200px; height: 10px; border: 1px solid {{foreground}}; margin-top: 10px; }
#progress-bar { width: 0; height: 100%; background: {{accent}}; }
</style>
</head>
<body>
<div id="app"></div>
<div id="loading">
{{#if loading_text}}<div class="loading-text">{{loading_text}}</div>{{/if}}
{{#if progress_bar}}<div id="progress"><div id="progress-bar"></div></div>{{/if}}
</div>
<script>
var setProgress = function (progress) {
  var bar = document.getElementById("progress-bar");
  if (bar) bar.style.width = (progress * 100) + "%";
};
</script>
{{#each project_chunks}}<script type="application/x-project-chunk">{{this.data}}</script>
<script>setProgress({{this.progress}});</script>
{{/each}}<script>
{{scaffolding}}
</script>
<script>
(function () {
  var options = {{options_json}};
  var source;
{{#if project_url_json}}  source = { url: {{project_url_json}} };
{{else}}  var chunks = document.querySelectorAll('script[type="application/x-project-chunk"]');
  var text = "";
  for (var i = 0; i < chunks.length; i++) text += chunks[i].textContent;
  source = { base85: text };
{{/if}}  window.Scaffolding.run(document.getElementById("app"), options, source, setProgress)
    .then(function () {
      var loading = document.getElementById("loading");
      if (loading) loading.remove();
    });
})();
</script>
</body>
</html>
"##;

/// Electron main process script.
pub const ELECTRON_MAIN_TEMPLATE: &str = r#"'use strict';
const { app, BrowserWindow } = require('electron');
const path = require('path');

const createWindow = () => {
  const window = new BrowserWindow({
    width: {{width}},
    height: {{height}},
    title: {{title_json}},
    icon: path.join(__dirname, {{icon_json}}),
    backgroundColor: {{background_json}},
    useContentSize: true,
    webPreferences: {
      contextIsolation: true,
      sandbox: true
    }
  });
  window.setMenuBarVisibility(false);
  window.loadFile(path.join(__dirname, 'index.html'));
};

app.whenReady().then(createWindow);
app.on('window-all-closed', () => app.quit());
"#;

/// Attribution appended to a runtime's open source notice document.
pub const NOTICE_TEMPLATE: &str = r#"
<section id="project-packager-notice">
<h2>{{package_name}}</h2>
<p>{{package_name}} was packaged with project_packager, available under the Apache-2.0 or MIT license.</p>
<p>It runs on the {{runtime}} runtime, whose notices are listed in this document, and includes the project player, which is distributed under its own open source license.</p>
</section>
"#;
