use std::sync::Arc;

use teloxide::{
    dispatching::UpdateHandler,
    prelude::*,
    types::{ChatId, KeyboardButton, KeyboardMarkup, KeyboardRemove, ReplyMarkup},
    utils::command::BotCommands,
    RequestError,
};

use crate::quiz::retry::{retry, RetryPolicy};
use crate::quiz::session::{AnswerOutcome, QuizError, SessionEngine, TextOutcome, UserId};

pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;
type HandlerResult = Result<(), HandlerError>;

#[derive(BotCommands, Clone, Debug, PartialEq, Eq)]
#[command(rename_rule = "lowercase", description = "Команды викторины:")]
pub enum Command {
    #[command(description = "начать викторину")]
    Start,
    #[command(description = "закончить викторину")]
    Cancel,
}

pub const NEW_QUESTION: &str = "Новый вопрос";
pub const GIVE_UP: &str = "Сдаюсь";
pub const MY_RESULT: &str = "Мой результат";

const GREETING_TEXT: &str = "Привет! Я бот для викторины";
const FAREWELL_TEXT: &str = "Всего хорошего! Заходи ещё.";
const CORRECT_TEXT: &str = "Правильно! Поздравляю! Для следующего вопроса нажми «Новый вопрос»";
const INCORRECT_TEXT: &str = "Неправильно… Попробуешь ещё раз?";
const RESULT_TEXT: &str = "Пока не работает";
const UNRECOGNIZED_TEXT: &str = "Извини, я не понял. Воспользуйся кнопками внизу.";
const UNKNOWN_COMMAND_TEXT: &str = "Извини, я не знаю такой команды.";
const NO_QUESTION_TEXT: &str = "Сначала нажми «Новый вопрос».";
const NO_QUESTIONS_TEXT: &str = "Не получилось загрузить вопросы. Попробуй ещё раз чуть позже.";
const TRY_AGAIN_TEXT: &str = "Что-то пошло не так. Попробуй ещё раз.";

pub fn schema() -> UpdateHandler<HandlerError> {
    Update::filter_message()
        .branch(
            dptree::entry()
                .filter_command::<Command>()
                .endpoint(receive_command),
        )
        .branch(button(NEW_QUESTION).endpoint(new_question))
        .branch(button(GIVE_UP).endpoint(give_up))
        .branch(button(MY_RESULT).endpoint(my_result))
        .branch(dptree::endpoint(receive_text))
}

fn button(label: &'static str) -> UpdateHandler<HandlerError> {
    dptree::filter(move |msg: Message| msg.text() == Some(label))
}

pub fn quiz_keyboard() -> KeyboardMarkup {
    KeyboardMarkup::new(vec![
        vec![
            KeyboardButton::new(NEW_QUESTION),
            KeyboardButton::new(GIVE_UP),
        ],
        vec![KeyboardButton::new(MY_RESULT)],
    ])
    .resize_keyboard(true)
}

/// Outgoing side of one chat, every send retried per policy.
struct Chat {
    bot: Bot,
    id: ChatId,
    retry: RetryPolicy,
}

impl Chat {
    fn new(bot: Bot, msg: &Message, retry: RetryPolicy) -> Self {
        Self {
            bot,
            id: msg.chat.id,
            retry,
        }
    }

    async fn say(&self, text: &str) -> Result<(), RequestError> {
        self.say_with(text, None).await
    }

    async fn say_with(
        &self,
        text: &str,
        markup: Option<ReplyMarkup>,
    ) -> Result<(), RequestError> {
        let (bot, id, markup) = (&self.bot, self.id, markup.as_ref());
        retry(self.retry, "Sending message", move || async move {
            let mut request = bot.send_message(id, text);
            if let Some(markup) = markup {
                request = request.reply_markup(markup.clone());
            }
            request.await
        })
        .await?;
        Ok(())
    }
}

fn user_of(msg: &Message) -> UserId {
    UserId(msg.chat.id.0)
}

async fn receive_command(
    bot: Bot,
    msg: Message,
    cmd: Command,
    engine: Arc<SessionEngine>,
    retry: RetryPolicy,
) -> HandlerResult {
    let chat = Chat::new(bot, &msg, retry);
    let user = user_of(&msg);

    match cmd {
        Command::Start => {
            chat.say_with(GREETING_TEXT, Some(quiz_keyboard().into()))
                .await?;
            if let Err(err) = engine.start(user).await {
                chat.say(error_reply(user, &err)).await?;
            }
        }
        Command::Cancel => match engine.cancel(user).await {
            Ok(()) => {
                chat.say_with(FAREWELL_TEXT, Some(KeyboardRemove::new().into()))
                    .await?
            }
            Err(err) => chat.say(error_reply(user, &err)).await?,
        },
    }
    Ok(())
}

async fn new_question(
    bot: Bot,
    msg: Message,
    engine: Arc<SessionEngine>,
    retry: RetryPolicy,
) -> HandlerResult {
    let chat = Chat::new(bot, &msg, retry);
    let user = user_of(&msg);

    match engine.new_question(user).await {
        Ok(question) => chat.say(&question).await?,
        Err(err) => chat.say(error_reply(user, &err)).await?,
    }
    Ok(())
}

async fn give_up(
    bot: Bot,
    msg: Message,
    engine: Arc<SessionEngine>,
    retry: RetryPolicy,
) -> HandlerResult {
    let chat = Chat::new(bot, &msg, retry);
    let user = user_of(&msg);

    let give_up = match engine.give_up(user).await {
        Ok(give_up) => give_up,
        Err(err) => {
            chat.say(error_reply(user, &err)).await?;
            return Ok(());
        }
    };

    chat.say(&format!("Правильный ответ: {}", give_up.answer))
        .await?;
    match give_up.next_question {
        Ok(question) => chat.say(&question).await?,
        Err(err) => chat.say(error_reply(user, &err)).await?,
    }
    Ok(())
}

// TODO: count correct answers and surrenders per user once scores are wanted
async fn my_result(bot: Bot, msg: Message, retry: RetryPolicy) -> HandlerResult {
    Chat::new(bot, &msg, retry).say(RESULT_TEXT).await?;
    Ok(())
}

async fn receive_text(
    bot: Bot,
    msg: Message,
    engine: Arc<SessionEngine>,
    retry: RetryPolicy,
) -> HandlerResult {
    let chat = Chat::new(bot, &msg, retry);
    let user = user_of(&msg);

    let text = match msg.text() {
        Some(text) if text.starts_with('/') => {
            chat.say(UNKNOWN_COMMAND_TEXT).await?;
            return Ok(());
        }
        Some(text) => text,
        None => {
            chat.say(UNRECOGNIZED_TEXT).await?;
            return Ok(());
        }
    };

    log::debug!("User {} says {:?}", user, text);
    match engine.handle_text(user, text).await {
        Ok(outcome) => chat.say(text_reply(outcome)).await?,
        Err(err) => chat.say(error_reply(user, &err)).await?,
    }
    Ok(())
}

fn text_reply(outcome: TextOutcome) -> &'static str {
    match outcome {
        TextOutcome::Answered(AnswerOutcome::Correct) => CORRECT_TEXT,
        TextOutcome::Answered(AnswerOutcome::Incorrect) => INCORRECT_TEXT,
        TextOutcome::Unrecognized => UNRECOGNIZED_TEXT,
    }
}

/// Every failure still gets the user an answer.
fn error_reply(user: UserId, err: &QuizError) -> &'static str {
    match err {
        QuizError::MissingActiveQuestion => {
            log::debug!("User {} has no active question", user);
            NO_QUESTION_TEXT
        }
        QuizError::Parse(_) | QuizError::EmptyCorpus | QuizError::Worker(_) => {
            log::error!("No questions for user {}: {}", user, err);
            NO_QUESTIONS_TEXT
        }
        QuizError::Store(_) => {
            log::error!("Store failed for user {}: {}", user, err);
            TRY_AGAIN_TEXT
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quiz::parser::ParseError;

    #[test]
    fn commands_parse() {
        assert!(matches!(
            Command::parse("/start", "quiz_bot"),
            Ok(Command::Start)
        ));
        assert!(matches!(
            Command::parse("/cancel", "quiz_bot"),
            Ok(Command::Cancel)
        ));
        assert!(Command::parse("/score", "quiz_bot").is_err());
    }

    #[test]
    fn keyboard_layout() {
        let labels: Vec<Vec<String>> = quiz_keyboard()
            .keyboard
            .into_iter()
            .map(|row| row.into_iter().map(|button| button.text).collect())
            .collect();
        assert_eq!(
            labels,
            vec![
                vec![NEW_QUESTION.to_string(), GIVE_UP.to_string()],
                vec![MY_RESULT.to_string()],
            ]
        );
    }

    #[test]
    fn outcomes_map_to_replies() {
        assert_eq!(
            text_reply(TextOutcome::Answered(AnswerOutcome::Correct)),
            CORRECT_TEXT
        );
        assert_eq!(
            text_reply(TextOutcome::Answered(AnswerOutcome::Incorrect)),
            INCORRECT_TEXT
        );
        assert_eq!(text_reply(TextOutcome::Unrecognized), UNRECOGNIZED_TEXT);
    }

    #[test]
    fn errors_map_to_recoverable_replies() {
        let user = UserId(7);
        assert_eq!(
            error_reply(user, &QuizError::MissingActiveQuestion),
            NO_QUESTION_TEXT
        );
        assert_eq!(error_reply(user, &QuizError::EmptyCorpus), NO_QUESTIONS_TEXT);
        assert_eq!(
            error_reply(user, &QuizError::Parse(ParseError::EmptyArchive)),
            NO_QUESTIONS_TEXT
        );
        let redis = redis::RedisError::from((redis::ErrorKind::IoError, "down"));
        assert_eq!(
            error_reply(user, &QuizError::Store(redis.into())),
            TRY_AGAIN_TEXT
        );
    }
}
