use std::io::stdout;
use std::time::{Duration, Instant};

use anyhow::Result;
use crossterm::event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyModifiers};
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use image::imageops::FilterType;
use image::DynamicImage;
use rand::Rng;
use ratatui::{
    backend::CrosstermBackend,
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, BorderType, Borders, List, ListItem, ListState, Paragraph, Wrap},
    Frame, Terminal,
};
use tokio::sync::{mpsc, watch};

use crate::carousel::Carousel;
use crate::config::{parse_hex_color, RadioConfig};
use crate::daily::DailyMessage;
use crate::hymnal::{self, Hymn};
use crate::session::{SessionControl, SessionView, Status};

const WAVE_BARS: usize = 40;

enum Screen {
    Radio,
    Hymnal,
}

struct UiState {
    screen: Screen,
    wave_phase: f32,
    last_volume_change: Instant,
    saved_volume: Option<f32>,
    query: String,
    selected: usize,
    lyric_scroll: u16,
}

impl UiState {
    fn new() -> Self {
        Self {
            screen: Screen::Radio,
            wave_phase: 0.0,
            last_volume_change: Instant::now(),
            saved_volume: None,
            query: String::new(),
            selected: 0,
            lyric_scroll: 0,
        }
    }
}

pub async fn run_ui(
    control: SessionControl,
    config: RadioConfig,
    slides: Vec<Option<DynamicImage>>,
    mut hymns_rx: watch::Receiver<Vec<Hymn>>,
    refresh_tx: mpsc::UnboundedSender<()>,
    daily: DailyMessage,
) -> Result<()> {
    enable_raw_mode()?;
    let mut stdout = stdout();
    crossterm::execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let accent_rgb = parse_hex_color(&config.primary_color).unwrap_or((59, 130, 246));
    let accent = Color::Rgb(accent_rgb.0, accent_rgb.1, accent_rgb.2);

    let mut state = UiState::new();
    let mut hymns: Vec<Hymn> = hymns_rx.borrow().clone();
    let mut carousel = Carousel::new(slides.len(), Instant::now());
    let placard = placard_lines(&config.church_name, accent_rgb);
    let mut art_key: Option<(usize, u16, u16)> = None;
    let mut art_lines: Vec<Line<'static>> = placard.clone();

    loop {
        if hymns_rx.has_changed().unwrap_or(false) {
            hymns = hymns_rx.borrow_and_update().clone();
        }
        carousel.tick(Instant::now());

        let view = control.view();
        let volume = control.volume();
        let results = hymnal::search(&hymns, &state.query);

        match state.screen {
            Screen::Radio => {
                let size = terminal.size()?;
                let panels = radio_panels(size);
                let cols = panels[0].width.saturating_sub(2);
                let rows = panels[0].height.saturating_sub(2);
                let key = (carousel.index(), cols, rows);
                if art_key != Some(key) {
                    art_lines = match slides.get(carousel.index()) {
                        Some(Some(image)) => image_lines(image, cols, rows),
                        _ => placard.clone(),
                    };
                    art_key = Some(key);
                }

                let playing = view.status == Status::Playing;
                let wave = animated_waveform(&mut state.wave_phase, playing, volume);
                let gauge = volume_gauge(volume);
                let radio = RadioScreen {
                    view: &view,
                    church: &config.church_name,
                    volume,
                    volume_flash: state.last_volume_change.elapsed() < Duration::from_secs(2),
                    wave: &wave,
                    gauge: &gauge,
                    art: &art_lines,
                    slide: (carousel.len() > 1).then(|| (carousel.index() + 1, carousel.len())),
                    daily: &daily,
                    accent,
                };
                terminal.draw(|f| draw_radio(f, &radio))?;
            }
            Screen::Hymnal => {
                let selected = if results.is_empty() {
                    None
                } else {
                    Some(state.selected.min(results.len() - 1))
                };
                let hymnal_screen = HymnalScreen {
                    query: &state.query,
                    results: &results,
                    total: hymns.len(),
                    selected,
                    lyric_scroll: state.lyric_scroll,
                    accent,
                };
                terminal.draw(|f| draw_hymnal(f, &hymnal_screen))?;
            }
        }

        if event::poll(Duration::from_millis(200))? {
            if let Event::Key(key) = event::read()? {
                match state.screen {
                    Screen::Radio => match key.code {
                        KeyCode::Char('q') => {
                            control.stop();
                            break;
                        }
                        KeyCode::Char(' ') => control.toggle_play(),
                        KeyCode::Char('+') | KeyCode::Char('=') => {
                            control.set_volume(volume + 0.1);
                            state.last_volume_change = Instant::now();
                        }
                        KeyCode::Char('-') => {
                            control.set_volume(volume - 0.1);
                            state.last_volume_change = Instant::now();
                        }
                        KeyCode::Up => {
                            control.set_volume(volume + 0.05);
                            state.last_volume_change = Instant::now();
                        }
                        KeyCode::Down => {
                            control.set_volume(volume - 0.05);
                            state.last_volume_change = Instant::now();
                        }
                        KeyCode::Char('m') => {
                            if volume > 0.0 {
                                state.saved_volume = Some(volume);
                                control.set_volume(0.0);
                            } else {
                                control.set_volume(state.saved_volume.unwrap_or(0.5));
                            }
                            state.last_volume_change = Instant::now();
                        }
                        KeyCode::Left => carousel.prev(Instant::now()),
                        KeyCode::Right => carousel.next(Instant::now()),
                        KeyCode::Char('h') => {
                            state.screen = Screen::Hymnal;
                            carousel.set_paused(true, Instant::now());
                        }
                        _ => {}
                    },
                    Screen::Hymnal => match key.code {
                        KeyCode::Esc => {
                            state.screen = Screen::Radio;
                            carousel.set_paused(false, Instant::now());
                        }
                        KeyCode::Up => {
                            state.selected = state.selected.saturating_sub(1);
                            state.lyric_scroll = 0;
                        }
                        KeyCode::Down => {
                            if !results.is_empty() {
                                state.selected = (state.selected + 1).min(results.len() - 1);
                            }
                            state.lyric_scroll = 0;
                        }
                        KeyCode::PageUp => {
                            state.lyric_scroll = state.lyric_scroll.saturating_sub(10);
                        }
                        KeyCode::PageDown => {
                            state.lyric_scroll = state.lyric_scroll.saturating_add(10);
                        }
                        KeyCode::Backspace => {
                            state.query.pop();
                            state.selected = 0;
                            state.lyric_scroll = 0;
                        }
                        KeyCode::Char('r') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                            let _ = refresh_tx.send(());
                        }
                        KeyCode::Char(c) => {
                            state.query.push(c);
                            state.selected = 0;
                            state.lyric_scroll = 0;
                        }
                        _ => {}
                    },
                }
            }
        }
    }

    disable_raw_mode()?;
    crossterm::execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;
    Ok(())
}

fn radio_panels(size: Rect) -> std::rc::Rc<[Rect]> {
    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(40), Constraint::Percentage(60)].as_ref())
        .split(size)
}

struct RadioScreen<'a> {
    view: &'a SessionView,
    church: &'a str,
    volume: f32,
    volume_flash: bool,
    wave: &'a str,
    gauge: &'a str,
    art: &'a [Line<'static>],
    slide: Option<(usize, usize)>,
    daily: &'a DailyMessage,
    accent: Color,
}

fn draw_radio(f: &mut Frame<'_>, radio: &RadioScreen<'_>) {
    let panels = radio_panels(f.size());

    let mut art_block = Block::default()
        .borders(Borders::ALL)
        .border_type(BorderType::Rounded)
        .border_style(Style::default().fg(radio.accent));
    if let Some((at, of)) = radio.slide {
        art_block = art_block
            .title(format!(" Fotos {}/{} ", at, of))
            .title_alignment(Alignment::Center);
    }
    let art = Paragraph::new(radio.art.to_vec())
        .alignment(Alignment::Center)
        .block(art_block);
    f.render_widget(art, panels[0]);

    let (icon, label, tone) = status_label(radio.view.status);
    let status_style = if radio.view.status == Status::Playing {
        Style::default().fg(tone).add_modifier(Modifier::BOLD)
    } else {
        Style::default().fg(tone)
    };

    let mut lines = vec![Line::from(vec![
        Span::raw("Status: "),
        Span::styled(format!("{} {}", icon, label), status_style),
    ])];

    if let Some(error) = radio.view.error.as_deref() {
        lines.push(Line::from(Span::styled(
            error.to_string(),
            Style::default().fg(Color::Red).add_modifier(Modifier::DIM),
        )));
    }
    lines.push(Line::from(""));

    lines.push(Line::from(vec![
        if radio.volume_flash {
            Span::styled("🔊 ", Style::default().fg(Color::Yellow))
        } else {
            Span::raw("")
        },
        Span::styled("Volume: ", Style::default().fg(Color::Magenta)),
        Span::styled(
            format!("{:.0}%", radio.volume * 100.0),
            Style::default()
                .fg(Color::White)
                .add_modifier(Modifier::BOLD),
        ),
    ]));
    lines.push(Line::from(radio.gauge.to_string()));
    lines.push(Line::from(""));

    lines.push(Line::from(Span::styled(
        "♫ Sintonia ♫",
        Style::default()
            .fg(Color::Cyan)
            .add_modifier(Modifier::BOLD),
    )));
    lines.push(Line::from(radio.wave.to_string()));
    lines.push(Line::from(""));

    lines.push(Line::from(Span::styled(
        "Versículo do dia",
        Style::default()
            .fg(radio.accent)
            .add_modifier(Modifier::BOLD),
    )));
    lines.push(Line::from(Span::styled(
        format!("\"{}\"", radio.daily.verse),
        Style::default().add_modifier(Modifier::ITALIC),
    )));
    lines.push(Line::from(Span::styled(
        radio.daily.reference.clone(),
        Style::default().fg(Color::Gray),
    )));
    lines.push(Line::from(radio.daily.thought.clone()));
    lines.push(Line::from(""));

    lines.push(Line::from(Span::styled(
        "─── Comandos ───",
        Style::default().fg(Color::Gray).add_modifier(Modifier::DIM),
    )));
    for (keys, action) in [
        ("  Space", " : tocar/pausar"),
        ("    +/-", " : volume"),
        ("      m", " : mudo"),
        ("    ←/→", " : fotos"),
        ("      h", " : Harpa Cristã"),
    ] {
        lines.push(Line::from(vec![
            Span::styled(
                keys,
                Style::default()
                    .fg(Color::Yellow)
                    .add_modifier(Modifier::BOLD),
            ),
            Span::raw(action),
        ]));
    }
    lines.push(Line::from(vec![
        Span::styled(
            "      q",
            Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
        ),
        Span::raw(" : sair"),
    ]));

    let right = Paragraph::new(lines).wrap(Wrap { trim: false }).block(
        Block::default()
            .borders(Borders::ALL)
            .border_type(BorderType::Rounded)
            .title(format!(" ♪ {} ♪ ", radio.church))
            .title_alignment(Alignment::Center)
            .border_style(Style::default().fg(radio.accent)),
    );
    f.render_widget(right, panels[1]);
}

struct HymnalScreen<'a> {
    query: &'a str,
    results: &'a [&'a Hymn],
    total: usize,
    selected: Option<usize>,
    lyric_scroll: u16,
    accent: Color,
}

fn draw_hymnal(f: &mut Frame<'_>, screen: &HymnalScreen<'_>) {
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(0),
            Constraint::Length(1),
        ])
        .split(f.size());

    let search = Paragraph::new(Line::from(vec![
        Span::styled("Busca: ", Style::default().fg(Color::Cyan)),
        Span::styled(
            screen.query.to_string(),
            Style::default()
                .fg(Color::White)
                .add_modifier(Modifier::BOLD),
        ),
        Span::styled("▌", Style::default().fg(screen.accent)),
    ]))
    .block(
        Block::default()
            .borders(Borders::ALL)
            .border_type(BorderType::Rounded)
            .title(" Harpa Cristã ")
            .title_alignment(Alignment::Center)
            .border_style(Style::default().fg(screen.accent)),
    );
    f.render_widget(search, rows[0]);

    let body = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(35), Constraint::Percentage(65)].as_ref())
        .split(rows[1]);

    if screen.results.is_empty() {
        let notice = if screen.total == 0 {
            "Carregando hinos..."
        } else {
            "Nenhum hino encontrado."
        };
        let empty = Paragraph::new(notice)
            .alignment(Alignment::Center)
            .block(Block::default().borders(Borders::ALL).title(" Hinos "));
        f.render_widget(empty, body[0]);
    } else {
        let items: Vec<ListItem> = screen
            .results
            .iter()
            .map(|hymn| ListItem::new(format!("{:>3}  {}", hymn.number, hymn.title)))
            .collect();
        let list = List::new(items)
            .block(
                Block::default()
                    .borders(Borders::ALL)
                    .title(format!(" Hinos ({}) ", screen.results.len())),
            )
            .highlight_style(
                Style::default()
                    .fg(Color::Black)
                    .bg(screen.accent)
                    .add_modifier(Modifier::BOLD),
            )
            .highlight_symbol("» ");
        let mut list_state = ListState::default();
        list_state.select(screen.selected);
        f.render_stateful_widget(list, body[0], &mut list_state);
    }

    let lyric_widget = match screen.selected.and_then(|index| screen.results.get(index)) {
        Some(hymn) => {
            let lyric_lines: Vec<Line> = hymn
                .lyrics
                .lines()
                .map(|line| {
                    if line == "[Refrão]" {
                        Line::from(Span::styled(
                            line.to_string(),
                            Style::default()
                                .fg(Color::Yellow)
                                .add_modifier(Modifier::BOLD),
                        ))
                    } else {
                        Line::from(line.to_string())
                    }
                })
                .collect();
            Paragraph::new(lyric_lines)
                .wrap(Wrap { trim: false })
                .scroll((screen.lyric_scroll, 0))
                .block(
                    Block::default()
                        .borders(Borders::ALL)
                        .title(format!(" Hino {} · {} ", hymn.number, hymn.title)),
                )
        }
        None => Paragraph::new("").block(Block::default().borders(Borders::ALL)),
    };
    f.render_widget(lyric_widget, body[1]);

    let help = Paragraph::new(Line::from(Span::styled(
        format!(
            "Esc voltar · ↑/↓ hino · PgUp/PgDn letra · Ctrl+R atualizar · Total de {} hinos",
            screen.total
        ),
        Style::default().fg(Color::Gray).add_modifier(Modifier::DIM),
    )));
    f.render_widget(help, rows[2]);
}

fn status_label(status: Status) -> (&'static str, &'static str, Color) {
    match status {
        Status::Playing => ("▶", "No Ar", Color::Green),
        Status::Paused => ("⏸", "Pausado", Color::Yellow),
        Status::Connecting => ("⟳", "Conectando...", Color::Cyan),
        Status::Idle => ("■", "Parado", Color::Gray),
        Status::Errored => ("✖", "Offline", Color::Red),
    }
}

/// Half-block rendering: each terminal cell carries two image rows, the
/// upper one on the foreground of `▀` and the lower one on the background.
fn image_lines(image: &DynamicImage, cols: u16, rows: u16) -> Vec<Line<'static>> {
    if cols == 0 || rows == 0 {
        return Vec::new();
    }
    let pixels = image
        .resize_exact(cols as u32, rows as u32 * 2, FilterType::Triangle)
        .to_rgb8();

    let mut lines = Vec::with_capacity(rows as usize);
    for row in 0..rows as u32 {
        let mut spans = Vec::with_capacity(cols as usize);
        for col in 0..cols as u32 {
            let top = pixels.get_pixel(col, row * 2);
            let bottom = pixels.get_pixel(col, row * 2 + 1);
            spans.push(Span::styled(
                "▀",
                Style::default()
                    .fg(Color::Rgb(top[0], top[1], top[2]))
                    .bg(Color::Rgb(bottom[0], bottom[1], bottom[2])),
            ));
        }
        lines.push(Line::from(spans));
    }
    lines
}

/// Stand-in art for slides with no image: the station name over a dappled
/// gradient, fading from the accent color down to a darker shade of it.
fn placard_lines(name: &str, accent: (u8, u8, u8)) -> Vec<Line<'static>> {
    const ROWS: usize = 17;
    const COLS: usize = 44;
    let fillers = ['¨', ' '];
    let mut rng = rand::thread_rng();

    let mut rows: Vec<String> = (0..ROWS)
        .map(|_| {
            (0..COLS)
                .map(|_| fillers[rng.gen_range(0..fillers.len())])
                .collect()
        })
        .collect();
    overlay_centered(&mut rows[ROWS / 2 - 1], &format!("  {}  ", name));
    overlay_centered(&mut rows[ROWS / 2 + 1], "  ♪ Rádio ao vivo ♪  ");

    let start = accent;
    let end = (accent.0 / 3, accent.1 / 3, accent.2 / 3);
    let n = rows.len() as f32;
    rows.into_iter()
        .enumerate()
        .map(|(i, row)| {
            let t = i as f32 / (n - 1.0);
            let r = (start.0 as f32 * (1.0 - t) + end.0 as f32 * t) as u8;
            let g = (start.1 as f32 * (1.0 - t) + end.1 as f32 * t) as u8;
            let b = (start.2 as f32 * (1.0 - t) + end.2 as f32 * t) as u8;
            Line::from(Span::styled(row, Style::default().fg(Color::Rgb(r, g, b))))
        })
        .collect()
}

fn overlay_centered(row: &mut String, text: &str) {
    let cols = row.chars().count();
    let text: String = text.chars().take(cols).collect();
    let len = text.chars().count();
    let start = (cols - len) / 2;

    let prefix: String = row.chars().take(start).collect();
    let suffix: String = row.chars().skip(start + len).collect();
    *row = format!("{}{}{}", prefix, text, suffix);
}

fn animated_waveform(phase: &mut f32, playing: bool, volume: f32) -> String {
    const GLYPHS: [char; 8] = ['▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];
    let mut rng = rand::thread_rng();

    if playing {
        *phase += 0.2;
    } else {
        *phase *= 0.95;
    }

    let mut bars = String::with_capacity(WAVE_BARS * 3);
    for i in 0..WAVE_BARS {
        let x = i as f32 / WAVE_BARS as f32;

        let wave1 = ((*phase + x * 8.0).sin() * 0.3 + 0.5).abs();
        let wave2 = ((*phase * 1.3 + x * 12.0).sin() * 0.2 + 0.5).abs();
        let wave3 = ((*phase * 0.7 + x * 4.0).cos() * 0.3 + 0.5).abs();

        let noise = rng.gen_range(-0.1..0.1);
        let combined = (wave1 + wave2 + wave3) / 3.0 + noise;
        let mut level = (combined * volume * 20.0).clamp(0.0, 7.0) as usize;
        if !playing || volume == 0.0 {
            level = (level as f32 * 0.2) as usize;
        }
        bars.push(GLYPHS[level.min(7)]);
    }
    bars
}

fn volume_gauge(volume: f32) -> String {
    let percent = (volume * 100.0) as usize;
    let len = 20;
    let filled = (percent * len / 100).min(len);

    let mut bar = String::from("│");
    for i in 0..len {
        if i >= filled {
            bar.push('·');
        } else if i < len * 60 / 100 {
            bar.push('▓');
        } else if i < len * 80 / 100 {
            bar.push('▒');
        } else {
            bar.push('░');
        }
    }
    bar.push('│');

    bar.push_str(if volume == 0.0 {
        " 🔇"
    } else if percent < 30 {
        " 🔈"
    } else if percent < 70 {
        " 🔉"
    } else {
        " 🔊"
    });
    bar
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_labels_are_in_portuguese() {
        assert_eq!(status_label(Status::Playing).1, "No Ar");
        assert_eq!(status_label(Status::Paused).1, "Pausado");
        assert_eq!(status_label(Status::Connecting).1, "Conectando...");
        assert_eq!(status_label(Status::Idle).1, "Parado");
        assert_eq!(status_label(Status::Errored).1, "Offline");
    }

    #[test]
    fn volume_gauge_tracks_the_level() {
        let half = volume_gauge(0.5);
        let filled = half
            .chars()
            .filter(|c| matches!(c, '▓' | '▒' | '░'))
            .count();
        assert_eq!(filled, 10);
        assert!(half.contains('🔉'));

        let muted = volume_gauge(0.0);
        assert!(muted.contains('🔇'));
        assert!(!muted.contains('▓'));

        let boosted = volume_gauge(2.0);
        let filled = boosted
            .chars()
            .filter(|c| matches!(c, '▓' | '▒' | '░'))
            .count();
        assert_eq!(filled, 20);
    }

    #[test]
    fn waveform_always_renders_the_full_width() {
        let mut phase = 0.0;
        let bars = animated_waveform(&mut phase, true, 0.8);
        assert_eq!(bars.chars().count(), WAVE_BARS);
        assert!(phase > 0.0);

        // paused playback lets the wave decay instead of advancing
        let before = phase;
        animated_waveform(&mut phase, false, 0.8);
        assert!(phase < before);
    }

    #[test]
    fn placard_centers_the_station_name() {
        let lines = placard_lines("AD Chega Tudo", (59, 130, 246));
        assert_eq!(lines.len(), 17);
        let rendered: Vec<String> = lines
            .iter()
            .map(|line| {
                line.spans
                    .iter()
                    .map(|span| span.content.as_ref())
                    .collect()
            })
            .collect();
        assert!(rendered.iter().any(|row| row.contains("AD Chega Tudo")));
        assert!(rendered.iter().any(|row| row.contains("Rádio ao vivo")));
        assert!(rendered.iter().all(|row| row.chars().count() == 44));
    }

    #[test]
    fn overlay_keeps_the_row_width() {
        let mut row = "¨".repeat(20);
        overlay_centered(&mut row, " Olá ");
        assert_eq!(row.chars().count(), 20);
        assert!(row.contains(" Olá "));

        let mut short = "¨".repeat(4);
        overlay_centered(&mut short, "longer than the row");
        assert_eq!(short.chars().count(), 4);
    }

    #[test]
    fn half_blocks_pair_two_pixel_rows() {
        let mut img = image::RgbImage::new(1, 2);
        img.put_pixel(0, 0, image::Rgb([255, 0, 0]));
        img.put_pixel(0, 1, image::Rgb([0, 0, 255]));

        let lines = image_lines(&DynamicImage::ImageRgb8(img), 1, 1);
        assert_eq!(lines.len(), 1);
        let span = &lines[0].spans[0];
        assert_eq!(span.content.as_ref(), "▀");
        assert_eq!(span.style.fg, Some(Color::Rgb(255, 0, 0)));
        assert_eq!(span.style.bg, Some(Color::Rgb(0, 0, 255)));

        assert!(image_lines(&DynamicImage::ImageRgb8(image::RgbImage::new(1, 2)), 0, 5).is_empty());
    }
}
