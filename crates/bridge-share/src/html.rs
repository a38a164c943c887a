//! HTML fragments for the share server (spec.md §4.C), grounded on
//! `share_server.py`'s `_UPLOAD_HTML`/`_EXPIRED_HTML`/listing renderer.

/// Rendered when a token has expired or fails verification.
pub const EXPIRED_HTML: &str = "\
<!DOCTYPE html>
<html><head><meta charset=\"utf-8\"><meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">
<title>Link expired</title></head>
<body><h2>This link has expired.</h2></body></html>";

/// Mobile-friendly drag-and-drop upload page served at `GET /u/{token}`.
pub fn upload_page() -> String {
    "\
<!DOCTYPE html>
<html><head><meta charset=\"utf-8\"><meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">
<title>Upload</title>
<style>
body{font-family:sans-serif;margin:0;padding:2rem;background:#111;color:#eee}
#drop{border:2px dashed #666;border-radius:8px;padding:2rem;text-align:center}
#drop.drag{border-color:#4af}
#list .name{display:inline-block;min-width:60%}
#list .remove{color:#f66;cursor:pointer;float:right}
button{margin-top:1rem;padding:.6rem 1.2rem}
</style></head>
<body>
<div id=\"app\">
<div id=\"drop\">Drop files here or <input type=\"file\" id=\"picker\" multiple></div>
<ul id=\"list\"></ul>
<button id=\"go\">Upload</button>
</div>
<script>
const files = [];
const drop = document.getElementById('drop');
const fl = document.getElementById('list');
function formatSize(n){return n>1e6?(n/1e6).toFixed(1)+'MB':(n/1e3).toFixed(0)+'KB';}
function render(){
  fl.innerHTML = '';
  files.forEach((f,i)=>{
    const d = document.createElement('li');
    d.innerHTML = `<span class=\"name\">${f.name}</span><span class=\"size\">${formatSize(f.size)}</span><span class=\"remove\" data-i=\"${i}\">&times;</span>`;
    fl.appendChild(d);
  });
}
function addFiles(list){ for (const f of list) files.push(f); render(); }
document.getElementById('picker').addEventListener('change', e => addFiles(e.target.files));
drop.addEventListener('dragover', e => { e.preventDefault(); drop.classList.add('drag'); });
drop.addEventListener('dragleave', () => drop.classList.remove('drag'));
drop.addEventListener('drop', e => { e.preventDefault(); drop.classList.remove('drag'); addFiles(e.dataTransfer.files); });
fl.addEventListener('click', e => {
  const i = e.target.dataset.i;
  if (i !== undefined) { files.splice(i, 1); render(); }
});
document.getElementById('go').addEventListener('click', async () => {
  const fd = new FormData();
  for (const f of files) fd.append('file', f, f.name);
  const res = await fetch(window.location.pathname + '/upload', { method: 'POST', body: fd });
  if (res.ok) {
    document.getElementById('app').innerHTML = '<div class=\"done\">Upload complete!</div>';
  } else {
    document.getElementById('app').innerHTML = '<div class=\"done\">Upload failed.</div>';
  }
});
</script>
</body></html>"
        .to_string()
}

/// Directory listing page for `GET /p/{token}/{rel}` when no `index.html`
/// is present. All path segments are HTML-escaped.
pub fn directory_listing(title: &str, token: &str, path: &str, entries: &[(String, bool)]) -> String {
    let safe_token = escape(token);
    let safe_path = escape(path);
    let items: String = entries
        .iter()
        .map(|(name, is_dir)| {
            let safe_name = escape(name);
            let suffix = if *is_dir { "/" } else { "" };
            let href = if safe_path.is_empty() {
                format!("/p/{safe_token}/{safe_name}")
            } else {
                format!("/p/{safe_token}/{safe_path}/{safe_name}")
            };
            format!("<li><a href=\"{href}\">{safe_name}{suffix}</a></li>")
        })
        .collect();

    format!(
        "<!DOCTYPE html>\n\
<html><head><meta charset=\"utf-8\"><meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\n\
<title>{title}</title></head><body><h2>{title}</h2><ul>{items}</ul></body></html>",
        title = escape(title),
    )
}

/// Minimal HTML escaping for text inserted into generated pages.
pub fn escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_html_special_chars() {
        assert_eq!(escape("<script>&\"'"), "&lt;script&gt;&amp;&quot;&#39;");
    }

    #[test]
    fn listing_escapes_entry_names() {
        let page = directory_listing("Files", "tok", "", &[("<evil>.txt".to_string(), false)]);
        assert!(page.contains("&lt;evil&gt;.txt"));
        assert!(!page.contains("<evil>"));
    }
}
