//! CLI module for the moodnotes application
//!
//! This module turns parsed commands into calls on the signed-in user's
//! journal session and prints the results.
use std::{
    fs::{read_to_string, OpenOptions},
    io::{stdin, stdout, Write},
    path::{Path, PathBuf},
    process::Command,
    sync::Arc,
};

use chrono::{DateTime, NaiveDate, Utc};
use console::style;
use log::{debug, info};
use shell_words::split;
use tempfile::Builder;

use crate::{
    all_tags, collect_import_paths, merge_tags, mood_options, now_millis, parse_tags, AuthState,
    Commands, Config, DirRemoteStore, EditNoteOptions, InsightService, Journal, JournalError,
    JournalSession, ListNotesOptions, Note, NotePatch, NoteType, NovelCategory,
    OpenAiInsightClient, Result, SortOrder, TypeFilter, ViewQuery,
};

/// CLI Application handler - processes CLI commands against a journal session
pub struct App {
    journal: Journal,

    /// Signed-in identity the journal is scoped to
    auth: AuthState,

    /// Application configuration
    config: Config,

    /// Where `login` and `logout` persist the signed-in user
    config_path: PathBuf,

    /// Whether to display verbose output
    verbose: bool,
}

impl App {
    /// Create a new CLI application over the configured document folder
    pub fn new(
        config: Config,
        config_path: PathBuf,
        user_override: Option<String>,
        verbose: bool,
    ) -> Result<Self> {
        let remote = DirRemoteStore::open(&config.remote_dir)?;
        let insights: Option<Arc<dyn InsightService>> =
            match OpenAiInsightClient::from_config(&config.ai) {
                Ok(client) => Some(Arc::new(client) as Arc<dyn InsightService>),
                Err(e) => {
                    debug!("Insights disabled: {}", e);
                    None
                }
            };

        // a user given on the command line overrides the persisted sign-in
        let auth = AuthState::new(user_override.or_else(|| config.default_user.clone()));
        let journal = Journal::new(config.clone(), Arc::new(remote), insights, &auth);

        Ok(Self {
            journal,
            auth,
            config,
            config_path,
            verbose,
        })
    }

    /// Run the CLI application with the given command
    pub async fn run(&mut self, command: Commands) -> Result<()> {
        match command {
            Commands::Login { user } => self.login(user),
            Commands::Logout => self.logout(),
            command => {
                self.journal.sync_identity().await?;
                let session = self.journal.session()?;
                session.wait_until_synced().await?;

                let result = self.dispatch(session, command).await;
                // flushes any pending debounced write
                self.journal.shutdown().await?;
                result
            }
        }
    }

    async fn dispatch(&self, session: &JournalSession, command: Commands) -> Result<()> {
        match command {
            Commands::New {
                title,
                content,
                tags,
                novel,
                edit,
            } => self.create_note(session, title, content, tags, novel, edit).await,
            Commands::List(options) => self.list_notes(session, options),
            Commands::Show { id, json } => self.show_note(session, &id, json),
            Commands::Edit(options) => self.handle_edit(session, options).await,
            Commands::Delete { id, force } => self.handle_delete(session, &id, force).await,
            Commands::Favorite { id } => {
                let note = session.toggle_favorite(&id).await?;
                if note.is_favorite {
                    println!("{} {} marked as favorite", style("★").yellow(), note.title);
                } else {
                    println!("{} is no longer a favorite", note.title);
                }
                Ok(())
            }
            Commands::Import {
                source,
                recursive,
                pattern,
            } => self.handle_import(session, &source, recursive, pattern).await,
            Commands::Analyze { id } => self.handle_analyze(session, &id).await,
            Commands::Continue { id } => self.handle_continue(session, &id).await,
            Commands::Tags => {
                print_list("tags", &all_tags(&session.notes()?));
                Ok(())
            }
            Commands::Moods => {
                print_list("moods", &mood_options(&session.notes()?));
                Ok(())
            }
            Commands::Watch => self.watch(session).await,
            Commands::Login { .. } | Commands::Logout => Ok(()),
        }
    }

    fn login(&mut self, user: String) -> Result<()> {
        self.config.default_user = Some(user.clone());
        self.config.save(&self.config_path)?;
        println!("Signed in as {}", style(&user).bold());
        self.auth.sign_in(user);
        Ok(())
    }

    fn logout(&mut self) -> Result<()> {
        match self.config.default_user.take() {
            Some(user) => {
                self.config.save(&self.config_path)?;
                println!("Signed out {}", user);
            }
            None => println!("Nobody is signed in."),
        }
        self.auth.sign_out();
        Ok(())
    }

    async fn create_note(
        &self,
        session: &JournalSession,
        title: Option<String>,
        content: Option<String>,
        tags: Option<String>,
        novel: Option<NovelCategory>,
        open_editor: bool,
    ) -> Result<()> {
        let title = title.unwrap_or_else(|| now_millis().format("%B %-d, %Y").to_string());

        let note_content = match content {
            Some(c) => c,
            None if open_editor => self.open_editor_with_content(&title, "")?,
            None => String::new(),
        };

        let note = match novel {
            Some(category) => Note::new(title, note_content, parse_tags(tags))
                .with_kind(NoteType::Novel, Some(category)),
            None => Note::new(title, note_content, parse_tags(tags)),
        };

        let note = session.create_note(note).await?;
        println!("Entry created with ID: {}", note.id);
        Ok(())
    }

    /// List notes according to provided filters and options
    fn list_notes(&self, session: &JournalSession, options: ListNotesOptions) -> Result<()> {
        let query = ViewQuery {
            search: options.search,
            mood: options.mood,
            favorites_only: options.favorites,
            type_filter: options.kind.map(TypeFilter::from).unwrap_or_default(),
            sort_by: options.sort_by,
            order: if options.ascending {
                SortOrder::Ascending
            } else {
                SortOrder::Descending
            },
        };

        let mut notes = session.view(&query)?;
        let total = notes.len();
        notes.truncate(options.limit);

        if options.json {
            println!("{}", serde_json::to_string_pretty(&notes)?);
            return Ok(());
        }
        self.display_notes_text(&notes);
        if total > notes.len() {
            println!(
                "\nShowing {} of {} entries. Use --limit to show more.",
                notes.len(),
                total
            );
        }
        Ok(())
    }

    /// Display notes in text format
    fn display_notes_text(&self, notes: &[Note]) {
        if notes.is_empty() {
            println!("No entries found matching the criteria.");
            return;
        }

        // Use terminal width for formatting if available
        let term_width = terminal_size::terminal_size()
            .map(|(w, _)| w.0 as usize)
            .unwrap_or(80);

        for (i, note) in notes.iter().enumerate() {
            if i > 0 {
                println!("{}", "-".repeat(term_width.min(50)));
            }

            let star = if note.is_favorite { "★ " } else { "" };
            println!(
                "{}{} | {}",
                style(star).yellow(),
                style(&note.title).bold(),
                note.created_at.format("%Y-%m-%d")
            );
            println!("ID: {} | {}", note.id, kind_label(note));

            if let Some(mood) = note.current_mood() {
                println!("Mood: {} ({}/10)", style(&mood.mood).magenta(), mood.score);
            }
            if !note.tags.is_empty() {
                let tags = note
                    .tags
                    .iter()
                    .map(|tag| format!("#{}", tag))
                    .collect::<Vec<_>>()
                    .join(" ");
                println!("Tags: {}", style(tags).cyan());
            }

            let preview = content_preview(&note.content, 100);
            if !preview.is_empty() {
                println!("\n{}", preview);
            }
        }

        println!(
            "\n{} entr{}",
            notes.len(),
            if notes.len() == 1 { "y" } else { "ies" }
        );
    }

    fn show_note(&self, session: &JournalSession, id: &str, json: bool) -> Result<()> {
        let note = session.note(id)?;
        if json {
            println!("{}", serde_json::to_string_pretty(&note)?);
            return Ok(());
        }

        println!("{}", style(&note.title).bold().underlined());
        println!("ID:      {}", note.id);
        println!("Kind:    {}", kind_label(&note));
        println!("Created: {}", note.created_at.format("%Y-%m-%d %H:%M"));
        println!("Updated: {}", note.updated_at.format("%Y-%m-%d %H:%M"));
        if note.is_backdated_after_update() {
            println!("{}", style("(backdated past its last edit)").dim());
        }
        if note.is_favorite {
            println!("{}", style("★ favorite").yellow());
        }
        if !note.tags.is_empty() {
            println!("Tags:    {}", style(note.tags.join(", ")).cyan());
        }
        if let Some(mood) = note.current_mood() {
            println!(
                "Mood:    {} ({}/10, {})",
                style(&mood.mood).magenta(),
                mood.score,
                mood.color
            );
            if self.verbose && note.mood_history.len() > 1 {
                for entry in &note.mood_history {
                    println!(
                        "         {} {}",
                        entry.timestamp.format("%Y-%m-%d %H:%M"),
                        entry.mood
                    );
                }
            }
        }
        if let Some(summary) = &note.ai_summary {
            println!("Summary: {}", summary);
        }
        if let Some(reflection) = &note.ai_reflection {
            println!("Reflect: {}", style(reflection).italic());
        }
        println!("\n{}", note.content);
        Ok(())
    }

    async fn handle_edit(&self, session: &JournalSession, options: EditNoteOptions) -> Result<()> {
        if options.content.is_some() && options.edit {
            return Err(JournalError::ApplicationError {
                message: "Cannot specify both --content and --edit options".to_string(),
            });
        }

        let note = session.note(&options.id)?;
        let mut patch = NotePatch {
            title: options.title,
            ..Default::default()
        };

        let mut content = match options.content {
            Some(content) => Some(content),
            None if options.edit => {
                Some(self.open_editor_with_content(&note.title, &note.content)?)
            }
            None => None,
        };
        if let Some(paragraph) = options.append {
            let base = content.unwrap_or_else(|| note.content.clone());
            content = Some(if base.trim().is_empty() {
                paragraph
            } else {
                format!("{}\n\n{}", base.trim_end(), paragraph)
            });
        }
        patch.content = content.filter(|c| *c != note.content);

        if options.add_tags.is_some() || options.remove_tags.is_some() {
            let remove = parse_tags(options.remove_tags);
            let mut tags = merge_tags(&note.tags, &parse_tags(options.add_tags));
            tags.retain(|tag| !remove.contains(tag));
            if tags != note.tags {
                patch.tags = Some(tags);
            }
        }

        if let Some(created) = options.created {
            patch.created_at = Some(parse_date(&created)?);
        }

        if let Some(category) = options.novel {
            patch.note_type = Some(NoteType::Novel);
            patch.novel_category = Some(Some(category));
        } else if options.journal {
            patch.note_type = Some(NoteType::Journal);
        }

        if patch.is_empty() {
            println!("Nothing to change.");
            return Ok(());
        }

        let updated = session.update_note(&options.id, &patch).await?;
        println!("Entry {} updated ({})", updated.id, session.save_status());
        if updated.is_backdated_after_update() {
            println!("Note: the entry is now dated after its last edit.");
        }
        Ok(())
    }

    fn open_editor_with_content(&self, title: &str, existing_content: &str) -> Result<String> {
        let temp_file = Builder::new().suffix(".md").tempfile()?;
        let temp_path = temp_file.path().to_path_buf();
        self.write_editor_template(&temp_path, title, existing_content)?;

        let editor_cmd = self.config.get_editor_command();
        info!("Opening editor to write entry content. Save and exit when done...");
        self.launch_editor(&editor_cmd, &temp_path)?;

        let content = read_to_string(&temp_path)?;
        Ok(process_editor_content(&content))
    }

    fn write_editor_template(&self, path: &Path, title: &str, existing_content: &str) -> Result<()> {
        let mut file = OpenOptions::new().write(true).open(path)?;

        writeln!(file, "<!-- {} -->", title)?;
        writeln!(
            file,
            "<!-- Lines that start with <!-- and end with --> are ignored. Save and exit when done. -->"
        )?;
        if !existing_content.is_empty() {
            writeln!(file, "{}", existing_content)?;
        }

        Ok(())
    }

    fn launch_editor(&self, editor_cmd: &str, file_path: &Path) -> Result<()> {
        let path_str = file_path.to_string_lossy();

        // Handle shell-like command parsing
        let args = split(editor_cmd).map_err(|e| JournalError::EditorError {
            message: format!("Failed to parse editor command: {}", e),
        })?;

        let Some((program, rest)) = args.split_first() else {
            return Err(JournalError::EditorError {
                message: "Empty editor command".to_string(),
            });
        };

        let status = Command::new(program)
            .args(rest)
            .arg(path_str.as_ref())
            .status()?;

        if !status.success() {
            return Err(JournalError::EditorError {
                message: "Editor exited with non-zero status".to_string(),
            });
        }

        Ok(())
    }

    async fn handle_delete(&self, session: &JournalSession, id: &str, force: bool) -> Result<()> {
        let note = session.note(id)?;

        if !force {
            println!("You are about to delete the following entry:");
            println!("ID:      {}", note.id);
            println!("Title:   {}", note.title);
            println!("Tags:    {}", note.tags.join(", "));
            println!("Created: {}", note.created_at.format("%Y-%m-%d %H:%M:%S"));

            if !note.content.is_empty() {
                let preview = note.content.lines().take(2).collect::<Vec<_>>().join("\n");
                println!("\nContent preview:");
                println!(
                    "{}{}",
                    preview,
                    if note.content.lines().count() > 2 {
                        "..."
                    } else {
                        ""
                    }
                );
            }

            println!("\nThis action cannot be undone!");
            if !confirm("Are you sure you want to delete this entry? [y/N]: ")? {
                println!("Deletion cancelled.");
                return Ok(());
            }
        }

        session.delete_note(id).await?;
        println!(
            "Entry '{}' ({}) has been permanently deleted.",
            note.title, note.id
        );
        Ok(())
    }

    /// Handle importing entries from text and Word files
    async fn handle_import(
        &self,
        session: &JournalSession,
        source: &Path,
        recursive: bool,
        pattern: Option<String>,
    ) -> Result<()> {
        let paths = if source.is_file() {
            vec![source.to_path_buf()]
        } else if source.is_dir() {
            collect_import_paths(source, recursive, pattern.as_deref())?
        } else {
            return Err(JournalError::Import {
                path: source.to_path_buf(),
                message: "no such file or directory".to_string(),
            });
        };

        if self.verbose {
            println!("Found {} matching files", paths.len());
        }

        let mut imported = 0;
        let mut failed = 0;
        for path in &paths {
            match session.import_file(path).await {
                Ok(note) => {
                    imported += 1;
                    println!(
                        "Imported {} as {} (dated {})",
                        path.display(),
                        note.id,
                        note.created_at.format("%Y-%m-%d")
                    );
                }
                Err(e) => {
                    failed += 1;
                    eprintln!("Failed to import {}: {}", path.display(), e);
                }
            }
        }

        println!(
            "\nImport complete: {} imported, {} failed, {} total",
            imported,
            failed,
            paths.len()
        );
        Ok(())
    }

    async fn handle_analyze(&self, session: &JournalSession, id: &str) -> Result<()> {
        let note = session.analyze_note(id).await?;
        if let Some(mood) = note.current_mood() {
            println!(
                "Mood: {} ({}/10, {})",
                style(&mood.mood).magenta().bold(),
                mood.score,
                mood.color
            );
        }
        if let Some(summary) = &note.ai_summary {
            println!("Summary: {}", summary);
        }
        if let Some(reflection) = &note.ai_reflection {
            println!("Reflect: {}", style(reflection).italic());
        }
        println!("Tags: {}", style(note.tags.join(", ")).cyan());
        Ok(())
    }

    async fn handle_continue(&self, session: &JournalSession, id: &str) -> Result<()> {
        let before = session.note(id)?;
        let after = session.continue_note(id).await?;
        match after.content.strip_prefix(before.content.as_str()) {
            Some(added) if !added.is_empty() => println!("{}", style(added.trim()).green()),
            _ => println!("Nothing was appended."),
        }
        Ok(())
    }

    /// Prints the collection on every snapshot until Ctrl-C
    async fn watch(&self, session: &JournalSession) -> Result<()> {
        let query = ViewQuery::default();
        let mut guard = session.unload_guard();

        loop {
            let seen = session.snapshots_applied();
            println!(
                "{} {} entries",
                style(format!("[{}]", now_millis().format("%H:%M:%S"))).dim(),
                session.notes()?.len()
            );
            self.display_notes_text(&session.view(&query)?);

            tokio::select! {
                changed = session.wait_for_snapshots(seen + 1) => changed?,
                interrupted = tokio::signal::ctrl_c() => {
                    interrupted?;
                    if guard.is_armed()
                        && !confirm("Changes are still being saved. Quit anyway? [y/N]: ")?
                    {
                        let status = guard.wait_until_settled().await;
                        println!("Save finished: {}", status);
                    }
                    println!("Stopped watching.");
                    return Ok(());
                }
            }
        }
    }
}

fn kind_label(note: &Note) -> String {
    match note.category() {
        Some(category) => format!("novel/{}", category),
        None => note.note_type.to_string(),
    }
}

fn print_list(what: &str, items: &[String]) {
    if items.is_empty() {
        println!("No {} yet.", what);
        return;
    }
    for item in items {
        println!("{}", item);
    }
}

fn confirm(prompt: &str) -> Result<bool> {
    print!("{}", prompt);
    stdout().flush()?;

    let mut input = String::new();
    stdin().read_line(&mut input)?;
    let input = input.trim().to_lowercase();
    Ok(input == "y" || input == "yes")
}

/// Parses `YYYY-MM-DD` (midnight UTC) or an RFC 3339 timestamp.
fn parse_date(value: &str) -> Result<DateTime<Utc>> {
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        if let Some(midnight) = date.and_hms_opt(0, 0, 0) {
            return Ok(midnight.and_utc());
        }
    }
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| JournalError::ApplicationError {
            message: format!("Invalid date '{}': use YYYY-MM-DD or RFC 3339", value),
        })
}

/// Drops the editor's comment lines and surrounding blank lines.
fn process_editor_content(content: &str) -> String {
    content
        .lines()
        .filter(|line| !(line.trim_start().starts_with("<!--") && line.trim_end().ends_with("-->")))
        .collect::<Vec<&str>>()
        .join("\n")
        .trim()
        .to_string()
}

/// First non-empty line, cut to `max_chars`
fn content_preview(content: &str, max_chars: usize) -> String {
    let first_line = content
        .lines()
        .find(|line| !line.trim().is_empty())
        .unwrap_or("");

    if first_line.chars().count() <= max_chars {
        first_line.to_string()
    } else {
        let cut: String = first_line.chars().take(max_chars).collect();
        format!("{}...", cut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn parses_plain_and_rfc3339_dates() {
        assert_eq!(
            parse_date("2021-06-01").unwrap(),
            Utc.with_ymd_and_hms(2021, 6, 1, 0, 0, 0).unwrap()
        );
        assert_eq!(
            parse_date("2021-06-01T08:30:00+02:00").unwrap(),
            Utc.with_ymd_and_hms(2021, 6, 1, 6, 30, 0).unwrap()
        );
        assert!(parse_date("yesterday").is_err());
    }

    #[test]
    fn editor_comments_are_dropped() {
        let raw = "<!-- Title -->\n<!-- help -->\n\nDear diary\n<!-- inline note -->\nthe end\n";
        assert_eq!(process_editor_content(raw), "Dear diary\nthe end");
    }

    #[test]
    fn preview_cuts_on_char_boundaries() {
        assert_eq!(content_preview("\n\n  \nfirst line\nsecond", 100), "first line");
        assert_eq!(content_preview("ééééé", 3), "ééé...");
    }
}
