//! Built-in login page.
//!
//! The form posts back to the URL that was requested, which is how the
//! gateway recognises a login submission: a `POST` carrying the pending
//! `session_id` cookie.

use crate::auth::resolver::LoginPrompt;

const PRODUCT: &str = env!("CARGO_PKG_NAME");
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// User-facing message for each prompt variant.
pub fn prompt_message(prompt: LoginPrompt) -> &'static str {
    match prompt {
        LoginPrompt::SignIn => "",
        LoginPrompt::PasswordRequired => "Password is required.",
        LoginPrompt::InvalidCredentials => "Invalid username or password.",
    }
}

/// Render the login page for the given prompt.
pub fn render_login_page(prompt: LoginPrompt) -> String {
    let message = prompt_message(prompt);
    let error_block = if message.is_empty() {
        String::new()
    } else {
        format!(r#"<p class="error" role="alert">{}</p>"#, escape_html(message))
    };

    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>Sign in</title>
<style>
body {{ font-family: system-ui, sans-serif; display: flex; justify-content: center; margin-top: 10vh; }}
form {{ display: flex; flex-direction: column; gap: .75rem; min-width: 18rem; }}
.error {{ color: #b00020; margin: 0; }}
footer {{ color: #888; font-size: .8rem; margin-top: 1rem; }}
</style>
</head>
<body>
<main>
<h1>Sign in</h1>
<form method="post">
{error_block}
<input type="text" name="username" placeholder="Username" autocomplete="username" autofocus>
<input type="password" name="password" placeholder="Password" autocomplete="current-password">
<button type="submit">Sign in</button>
</form>
<footer>{product} {version}</footer>
</main>
</body>
</html>
"#,
        product = PRODUCT,
        version = VERSION,
    )
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_page_has_no_error() {
        let page = render_login_page(LoginPrompt::SignIn);
        assert!(page.contains(r#"name="username""#));
        assert!(page.contains(r#"name="password""#));
        assert!(!page.contains("class=\"error\""));
    }

    #[test]
    fn prompts_render_their_message() {
        assert!(render_login_page(LoginPrompt::PasswordRequired).contains("Password is required."));
        assert!(render_login_page(LoginPrompt::InvalidCredentials)
            .contains("Invalid username or password."));
    }

    #[test]
    fn escapes_markup() {
        assert_eq!(escape_html(r#"<a href="x">&'"#), "&lt;a href=&quot;x&quot;&gt;&amp;&#39;");
    }
}
