use anstyle::{AnsiColor, Color, RgbColor, Style};
use clap::builder::Styles;

use crate::utils::CHECK;

// MakeCode palette
const BLOCK_BLUE: RgbColor = RgbColor(76, 151, 255); // #4C97FF
const BLOCK_GREEN: RgbColor = RgbColor(89, 192, 89); // #59C059

pub(crate) fn get_styles() -> Styles {
    Styles::styled()
        .usage(
            Style::new()
                .bold()
                .underline()
                .fg_color(Some(Color::Rgb(BLOCK_BLUE))),
        )
        .header(
            Style::new()
                .bold()
                .underline()
                .fg_color(Some(Color::Rgb(BLOCK_BLUE))),
        )
        .literal(Style::new().fg_color(Some(Color::Rgb(BLOCK_GREEN))))
        .invalid(
            Style::new()
                .bold()
                .fg_color(Some(Color::Ansi(AnsiColor::Red))),
        )
        .error(
            Style::new()
                .bold()
                .fg_color(Some(Color::Ansi(AnsiColor::Red))),
        )
        .valid(
            Style::new()
                .bold()
                .underline()
                .fg_color(Some(Color::Rgb(BLOCK_GREEN))),
        )
        .placeholder(Style::new().fg_color(Some(Color::Ansi(AnsiColor::White))))
}

fn fmt_style(msg: &str, style: &Style) -> String {
    format!("{style}{msg}{style:#}")
}

pub(crate) fn fmt_blue(msg: &str) -> String {
    fmt_style(msg, &Style::new().fg_color(Some(Color::Rgb(BLOCK_BLUE))))
}

pub(crate) fn fmt_green(msg: &str) -> String {
    fmt_style(msg, &Style::new().fg_color(Some(Color::Rgb(BLOCK_GREEN))))
}

pub(crate) fn fmt_red(msg: &str) -> String {
    let red = Style::new().fg_color(Some(Color::Ansi(AnsiColor::Red)));
    fmt_style(msg, &red)
}

pub(crate) fn fmt_dimmed(msg: &str) -> String {
    fmt_style(msg, &Style::new().dimmed())
}

pub(crate) fn fmt_success(msg: &str) -> String {
    format!("{} {msg}", fmt_green(CHECK))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_marks_prefix_message() {
        assert!(fmt_success("done").ends_with(" done"));
        assert!(fmt_success("done").contains(CHECK));
        assert!(fmt_red("nope").contains("nope"));
    }
}
