use anyhow::{bail, Context, Result};
use recap_quiz::commands::{NotesInput, PredefinedQuiz, QuizApp};
use recap_quiz::models::{Question, Quiz, UserAnswer};
use recap_quiz::services::storage::StoreError;
use recap_quiz::services::{GeminiSession, HttpBackend, QuizStore};
use recap_quiz::utils::{self, logger, settings::AppSettings};
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};

const USAGE: &str = "usage:
  recap quiz <notes-file> [--link URL]... [--image PATH]... [--no-stream]
  recap quiz --template <templates.json> <title> [--image PATH]... [--no-stream]
  recap history
  recap import <quiz-file>";

/// 命令行参数
struct QuizArgs {
    /// 笔记文件，使用模板时为模板标题
    source: String,
    template: Option<PathBuf>,
    links: Vec<String>,
    images: Vec<PathBuf>,
    stream: bool,
}

fn parse_quiz_args(args: &[String]) -> Result<QuizArgs> {
    let mut source = None;
    let mut template = None;
    let mut links = Vec::new();
    let mut images = Vec::new();
    let mut stream = true;

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--link" => links.push(iter.next().context("--link needs a value")?.clone()),
            "--image" => images.push(PathBuf::from(iter.next().context("--image needs a value")?)),
            "--template" => template = Some(PathBuf::from(iter.next().context("--template needs a value")?)),
            "--no-stream" => stream = false,
            other if source.is_none() => source = Some(other.to_string()),
            other => bail!("unexpected argument: {}", other),
        }
    }

    Ok(QuizArgs {
        source: source.context(USAGE)?,
        template,
        links,
        images,
        stream,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let log_path = utils::get_log_path();
    logger::init(Some(log_path.as_path())).context("failed to initialize logging")?;

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first() else {
        bail!(USAGE);
    };

    let mut settings = AppSettings::load(&utils::get_settings_path())?;
    settings.apply_env_overrides();

    let app = QuizApp::new(
        GeminiSession::new(HttpBackend::new()),
        QuizStore::new(utils::get_history_path()),
    );

    match app.load_history().await {
        Ok(count) => log::debug!("{} quizzes in history", count),
        Err(recap_quiz::CommandError::Store(e @ StoreError::Corrupt { .. })) => {
            eprintln!("warning: {}", e);
        }
        Err(e) => return Err(e.into()),
    }

    match command.as_str() {
        "history" => print_history(&app).await,
        "import" => {
            let path = args.get(1).context(USAGE)?;
            app.import_quiz(Path::new(path)).await?;
            println!("Imported {}", path);
            Ok(())
        }
        "quiz" => run_quiz(&app, &settings, parse_quiz_args(&args[1..])?).await,
        _ => bail!(USAGE),
    }
}

async fn print_history(app: &QuizApp<HttpBackend>) -> Result<()> {
    let entries = app.history_entries().await;
    if entries.is_empty() {
        println!("No quizzes yet.");
    }
    for (i, entry) in entries.iter().enumerate() {
        let score = entry
            .score
            .map(|s| format!("{}/{} graded correct", s.correct, s.gradable))
            .unwrap_or_else(|| "not answered".to_string());
        println!(
            "{:>3}. {} ({} questions, {})",
            i + 1,
            entry.title,
            entry.question_count,
            score
        );
    }
    Ok(())
}

async fn run_quiz(app: &QuizApp<HttpBackend>, settings: &AppSettings, args: QuizArgs) -> Result<()> {
    app.configure(settings).await?;

    let mut notes = match &args.template {
        Some(path) => {
            let templates = PredefinedQuiz::load_all(path).await?;
            let template = templates
                .iter()
                .find(|t| t.title == args.source)
                .with_context(|| format!("no template titled \"{}\"", args.source))?;
            log::info!("Using template \"{}\" ({})", template.title, template.category);
            NotesInput::from(template)
        }
        None => NotesInput::new(
            tokio::fs::read_to_string(&args.source)
                .await
                .with_context(|| format!("failed to read {}", args.source))?,
        ),
    };
    notes.links.extend(args.links);
    for path in &args.images {
        notes.images.push(
            tokio::fs::read(path)
                .await
                .with_context(|| format!("failed to read {}", path.display()))?,
        );
    }

    let result = if args.stream {
        let quiz = app
            .generate_quiz_stream(&notes, |text| {
                eprint!("\rreceived {} characters", text.len());
                let _ = std::io::stderr().flush();
            })
            .await;
        eprintln!();
        quiz
    } else {
        app.generate_quiz(&notes).await
    };
    let quiz = match result {
        Ok(quiz) => quiz,
        Err(e) => bail!(e.display_text()),
    };

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let answers = ask_questions(&quiz, &mut stdin).await?;
    app.complete_quiz(&quiz, answers, &notes).await?;

    if let Some(entry) = app.history_entries().await.last() {
        if let Some(score) = entry.score {
            println!(
                "Score: {}/{} multiple choice correct ({} questions)",
                score.correct, score.gradable, score.total
            );
        }
    }
    Ok(())
}

async fn ask_questions(quiz: &Quiz, stdin: &mut Lines<BufReader<Stdin>>) -> Result<Vec<UserAnswer>> {
    println!("\n{}\n", quiz.quiz_title);
    let mut answers = Vec::with_capacity(quiz.questions.len());

    for (index, question) in quiz.questions.iter().enumerate() {
        println!("{}. {}", index + 1, question.prompt());
        let selections = match question {
            Question::MultipleChoice { options, .. } => {
                for (i, option) in options.iter().enumerate() {
                    println!("   {}) {}", i + 1, option.text);
                }
                print!("choose (comma separated): ");
                std::io::stdout().flush()?;
                let line = stdin.next_line().await?.unwrap_or_default();
                line.split(',')
                    .filter_map(|n| n.trim().parse::<usize>().ok())
                    .filter_map(|n| options.get(n.wrapping_sub(1)))
                    .map(|o| o.text.clone())
                    .collect()
            }
            Question::FreeResponse { .. } => {
                print!("answer: ");
                std::io::stdout().flush()?;
                vec![stdin.next_line().await?.unwrap_or_default()]
            }
        };
        answers.push(UserAnswer::new(index, selections));
    }

    Ok(answers)
}
